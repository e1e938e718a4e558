//! Named containers of gates and sub-modules.

use log::debug;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use super::gate::Gate;
use crate::error::{SimError, SimResult};
use crate::simulation::SimContext;

/// Building block of a layered stack.
///
/// A module owns uniquely named gates and sub-modules. Neither is ever removed.
/// Cloning yields another handle to the same module.
pub struct Module<M> {
    inner: Rc<ModuleInner<M>>,
}

struct ModuleInner<M> {
    name: String,
    path: String,
    ctx: SimContext,
    gates: RefCell<BTreeMap<String, Gate<M>>>,
    sub_modules: RefCell<BTreeMap<String, Module<M>>>,
    listeners: RefCell<BTreeSet<String>>,
}

impl<M: Clone + 'static> Module<M> {
    pub fn new(ctx: &SimContext, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::build(ctx, name.clone(), name)
    }

    /// Module whose display path is `owner.name`.
    pub fn with_owner(ctx: &SimContext, owner: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = format!("{}.{}", owner, name);
        Self::build(ctx, name, path)
    }

    fn build(ctx: &SimContext, name: String, path: String) -> Self {
        Self {
            inner: Rc::new(ModuleInner {
                name,
                path,
                ctx: ctx.clone(),
                gates: RefCell::new(BTreeMap::new()),
                sub_modules: RefCell::new(BTreeMap::new()),
                listeners: RefCell::new(BTreeSet::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dotted path used in log lines and error messages.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn context(&self) -> &SimContext {
        &self.inner.ctx
    }

    /// Create a gate called `name`.
    pub fn add_gate(&self, name: &str) -> SimResult<Gate<M>> {
        let mut gates = self.inner.gates.borrow_mut();
        if gates.contains_key(name) {
            return Err(SimError::DuplicateName {
                owner: self.inner.path.clone(),
                what: "gate",
                name: name.to_string(),
            });
        }
        let gate = Gate::new(&self.inner.ctx, self.inner.path.clone(), name);
        gates.insert(name.to_string(), gate.clone());
        debug!("{}: added gate '{}'", self.inner.path, name);
        Ok(gate)
    }

    pub fn add_sub_module(&self, name: &str, module: Module<M>) -> SimResult<()> {
        let mut sub_modules = self.inner.sub_modules.borrow_mut();
        if sub_modules.contains_key(name) {
            return Err(SimError::DuplicateName {
                owner: self.inner.path.clone(),
                what: "sub-module",
                name: name.to_string(),
            });
        }
        sub_modules.insert(name.to_string(), module);
        Ok(())
    }

    pub fn gate(&self, name: &str) -> Option<Gate<M>> {
        self.inner.gates.borrow().get(name).cloned()
    }

    /// Like [`Module::gate`] but a missing gate is a configuration error.
    pub fn require_gate(&self, name: &str) -> SimResult<Gate<M>> {
        self.gate(name).ok_or_else(|| SimError::UnknownGate {
            owner: self.inner.path.clone(),
            name: name.to_string(),
        })
    }

    pub fn sub_module(&self, name: &str) -> Option<Module<M>> {
        self.inner.sub_modules.borrow().get(name).cloned()
    }

    pub fn gate_names(&self) -> Vec<String> {
        self.inner.gates.borrow().keys().cloned().collect()
    }

    /// Record a listener registration. Returns `false` if `handler` was already registered.
    pub(crate) fn register_listener(&self, handler: &str) -> bool {
        self.inner.listeners.borrow_mut().insert(handler.to_string())
    }
}

/// A protocol layer built around one module.
pub trait StackLayer<M: Clone + 'static> {
    fn module(&self) -> &Module<M>;

    fn name(&self) -> &str {
        self.module().path()
    }
}

impl<M> Clone for Module<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M> fmt::Display for Module<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.path)
    }
}
