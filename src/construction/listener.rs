//! Explicit registration of gate listeners.
//!
//! A component binds a handler to the input port of one of its gates when it is
//! constructed. The runtime then invokes the handler for every message arriving at
//! that gate:
//!
//! - [`GateListener::bind_callback`] runs the handler synchronously inside `send`.
//! - [`GateListener::bind_task`] runs it in a long-lived process, one message at a
//!   time, with a [`QueuePolicy`] deciding what happens to messages that arrive
//!   while the handler is busy.
//!
//! Handlers return `SimResult<()>`; an error aborts the simulation run.

use futures::StreamExt;
use futures::channel::mpsc;
use log::{info, warn};
use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use super::module::Module;
use crate::error::{SimError, SimResult};

/// Messages that can name their own type, for listener type validation.
pub trait MessageKind {
    fn kind_name(&self) -> &'static str;
}

macro_rules! impl_message_kind {
    ($($ty:ty),*) => {
        $(impl MessageKind for $ty {
            fn kind_name(&self) -> &'static str {
                stringify!($ty)
            }
        })*
    };
}

impl_message_kind!(String, u32, u64, i32, i64, f64);

/// What a task listener does with a message that arrives while its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Queue it. Messages are handled one by one in arrival order and never dropped.
    #[default]
    Buffered,
    /// Drop it and log a warning.
    Unbuffered,
}

/// Builder describing one listener binding.
#[derive(Debug, Clone)]
pub struct GateListener {
    gate: String,
    handler: String,
    accepted: Option<Vec<&'static str>>,
    policy: QueuePolicy,
}

struct Validator {
    gate: String,
    instance: String,
    accepted: Option<Vec<&'static str>>,
}

impl Validator {
    fn check<M: MessageKind>(&self, message: &M) -> SimResult<()> {
        match &self.accepted {
            Some(accepted) if !accepted.contains(&message.kind_name()) => Err(SimError::MessageTypeMismatch {
                gate: self.gate.clone(),
                instance: self.instance.clone(),
                expected: accepted.clone(),
                got: message.kind_name(),
            }),
            _ => Ok(()),
        }
    }
}

impl GateListener {
    /// Listener for the input of gate `gate`, registered under `handler`.
    ///
    /// `handler` identifies the binding within its module: binding the same
    /// handler name twice on one module is ignored.
    pub fn new(gate: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            handler: handler.into(),
            accepted: None,
            policy: QueuePolicy::default(),
        }
    }

    /// Only accept messages whose [`MessageKind::kind_name`] is listed.
    pub fn accepting(mut self, kinds: &[&'static str]) -> Self {
        self.accepted = Some(kinds.to_vec());
        self
    }

    pub fn policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn validator<M>(&self, module: &Module<M>) -> Validator
    where
        M: Clone + 'static,
    {
        Validator {
            gate: self.gate.clone(),
            instance: module.path().to_string(),
            accepted: self.accepted.clone(),
        }
    }

    fn register<M>(&self, module: &Module<M>) -> SimResult<bool>
    where
        M: Clone + 'static,
    {
        module.require_gate(&self.gate)?;
        if !module.register_listener(&self.handler) {
            info!("{}: listener '{}' already bound, ignoring", module.path(), self.handler);
            return Ok(false);
        }
        Ok(true)
    }

    /// Run `handler` synchronously for every message on the gate's input.
    ///
    /// Returns `Ok(false)` if this handler was already bound on `module`.
    pub fn bind_callback<M, F>(&self, module: &Module<M>, handler: F) -> SimResult<bool>
    where
        M: Clone + MessageKind + 'static,
        F: Fn(M) -> SimResult<()> + 'static,
    {
        if !self.register(module)? {
            return Ok(false);
        }
        let gate = module.require_gate(&self.gate)?;
        let validator = self.validator(module);
        let ctx = module.context().clone();
        gate.input.subscribe(move |message| {
            if let Err(err) = validator.check(message).and_then(|_| handler(message.clone())) {
                ctx.fail(err);
            }
        });
        Ok(true)
    }

    /// Run `handler` in a dedicated process, one message at a time.
    ///
    /// Returns `Ok(false)` if this handler was already bound on `module`.
    pub fn bind_task<M, F, Fut>(&self, module: &Module<M>, handler: F) -> SimResult<bool>
    where
        M: Clone + MessageKind + 'static,
        F: Fn(M) -> Fut + 'static,
        Fut: Future<Output = SimResult<()>> + 'static,
    {
        if !self.register(module)? {
            return Ok(false);
        }
        let gate = module.require_gate(&self.gate)?;
        let validator = self.validator(module);
        let ctx = module.context().clone();
        let (tx, mut rx) = mpsc::unbounded::<M>();
        let busy = Rc::new(Cell::new(false));

        let policy = self.policy;
        let label = format!("{}.{}", module.path(), self.handler);
        let fail_ctx = ctx.clone();
        let accept_busy = busy.clone();
        gate.input.subscribe(move |message| {
            if let Err(err) = validator.check(message) {
                fail_ctx.fail(err);
                return;
            }
            if policy == QueuePolicy::Unbuffered && accept_busy.get() {
                warn!("{}: handler busy, dropping {}", label, message.kind_name());
                return;
            }
            accept_busy.set(true);
            if tx.unbounded_send(message.clone()).is_err() {
                info!("{}: listener stopped, message discarded", label);
            }
        });

        let task_ctx = ctx.clone();
        ctx.spawn(async move {
            while let Some(message) = rx.next().await {
                if let Err(err) = handler(message).await {
                    task_ctx.fail(err);
                    break;
                }
                busy.set(false);
            }
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Simulation;
    use std::cell::RefCell;
    use std::time::Duration;

    fn module_with_gate(sim: &Simulation) -> Module<String> {
        let module = Module::new(&sim.context(), "Layer");
        module.add_gate("in").unwrap();
        module
    }

    #[test]
    fn callback_binding_is_idempotent() {
        let mut sim = Simulation::new();
        let module = module_with_gate(&sim);
        let count = Rc::new(Cell::new(0));
        for _ in 0..2 {
            let count = count.clone();
            let listener = GateListener::new("in", "on_message");
            listener
                .bind_callback(&module, move |_m: String| {
                    count.set(count.get() + 1);
                    Ok(())
                })
                .unwrap();
        }
        module.gate("in").unwrap().input.send("x".into());
        sim.run().unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn buffered_task_handles_every_message_in_order() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let module = module_with_gate(&sim);
        let handled = Rc::new(RefCell::new(Vec::new()));
        {
            let handled = handled.clone();
            let ctx = ctx.clone();
            GateListener::new("in", "worker")
                .policy(QueuePolicy::Buffered)
                .bind_task(&module, move |m: String| {
                    let handled = handled.clone();
                    let ctx = ctx.clone();
                    async move {
                        ctx.timeout(Duration::from_millis(10)).await;
                        handled.borrow_mut().push(m);
                        Ok(())
                    }
                })
                .unwrap();
        }
        let input = module.gate("in").unwrap().input;
        for i in 0..5 {
            input.send(format!("m{}", i));
        }
        sim.run().unwrap();
        assert_eq!(*handled.borrow(), vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(sim.now(), Duration::from_millis(50));
    }

    #[test]
    fn unbuffered_task_drops_messages_while_busy() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let module = module_with_gate(&sim);
        let handled = Rc::new(RefCell::new(Vec::new()));
        {
            let handled = handled.clone();
            let ctx = ctx.clone();
            GateListener::new("in", "worker")
                .policy(QueuePolicy::Unbuffered)
                .bind_task(&module, move |m: String| {
                    let handled = handled.clone();
                    let ctx = ctx.clone();
                    async move {
                        handled.borrow_mut().push(m);
                        ctx.timeout(Duration::from_millis(10)).await;
                        Ok(())
                    }
                })
                .unwrap();
        }
        let input = module.gate("in").unwrap().input;
        input.send("first".into());
        input.send("dropped".into());
        let ctx2 = ctx.clone();
        let later = input.clone();
        ctx.spawn(async move {
            ctx2.timeout(Duration::from_millis(20)).await;
            later.send("after".into());
        });
        sim.run().unwrap();
        assert_eq!(*handled.borrow(), vec!["first", "after"]);
    }

    #[test]
    fn disallowed_message_type_aborts_the_run() {
        let mut sim = Simulation::new();
        let module: Module<u32> = Module::new(&sim.context(), "Phy");
        module.add_gate("mac").unwrap();
        GateListener::new("mac", "on_mac")
            .accepting(&["String"])
            .bind_callback(&module, |_m: u32| Ok(()))
            .unwrap();
        module.gate("mac").unwrap().input.send(3);
        let err = sim.run().unwrap_err();
        assert_eq!(
            err,
            SimError::MessageTypeMismatch {
                gate: "mac".into(),
                instance: "Phy".into(),
                expected: vec!["String"],
                got: "u32",
            }
        );
    }

    #[test]
    fn unknown_gate_is_a_configuration_error() {
        let sim = Simulation::new();
        let module = module_with_gate(&sim);
        let result = GateListener::new("missing", "h").bind_callback(&module, |_m: String| Ok(()));
        assert!(matches!(result, Err(SimError::UnknownGate { .. })));
    }
}
