//! Publish/subscribe point used by every simulated component.
//!
//! A [`Notifier`] fans a triggered value out to three kinds of subscribers, in
//! this order:
//!
//! 1. callbacks, synchronously, in ascending priority (ties in subscription order);
//! 2. process subscriptions, which start a new process per their [`ProcessMode`];
//! 3. the pending one-shot [`Event`] handed out by [`Notifier::event`], if any.
//!
//! All three happen before `trigger` returns. Processes started in step 2 only run
//! once the caller yields to the executor.

use futures::future::LocalBoxFuture;
use log::{debug, error, trace};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use super::event::{Event, EventWait};
use super::runtime::SimContext;

/// Backlog length at which a queued process subscription reports an error.
pub const QUEUE_WARNING_THRESHOLD: usize = 10_000;

/// Handle identifying a callback subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// Handle identifying a process subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

/// How a process subscription reacts to a trigger that arrives while an instance
/// it started earlier is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Start another concurrent instance for every trigger.
    NonBlocking,
    /// Ignore the trigger.
    Blocking,
    /// Buffer the value and replay it once the running instance finishes.
    Queued,
}

type Callback<T> = Rc<dyn Fn(&T)>;
type ProcessFn<T> = Rc<dyn Fn(T) -> LocalBoxFuture<'static, ()>>;

struct CallbackEntry<T> {
    id: CallbackId,
    priority: i32,
    callback: Callback<T>,
}

struct ProcessSubscription<T> {
    id: ProcessId,
    mode: ProcessMode,
    process: ProcessFn<T>,
    running: Cell<bool>,
    backlog: RefCell<VecDeque<T>>,
    overflow_reported: Cell<bool>,
}

/// Named event publication point.
pub struct Notifier<T> {
    inner: Rc<NotifierInner<T>>,
}

struct NotifierInner<T> {
    name: String,
    ctx: SimContext,
    callbacks: RefCell<Vec<CallbackEntry<T>>>,
    processes: RefCell<Vec<Rc<ProcessSubscription<T>>>>,
    event: RefCell<Option<Event<T>>>,
    next_id: Cell<u64>,
}

impl<T: Clone + 'static> Notifier<T> {
    pub fn new(ctx: &SimContext, name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(NotifierInner {
                name: name.into(),
                ctx: ctx.clone(),
                callbacks: RefCell::new(Vec::new()),
                processes: RefCell::new(Vec::new()),
                event: RefCell::new(None),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Add a callback. Lower priorities run first.
    pub fn subscribe_callback(&self, priority: i32, callback: impl Fn(&T) + 'static) -> CallbackId {
        let id = CallbackId(self.next_id());
        let mut callbacks = self.inner.callbacks.borrow_mut();
        let position = callbacks.iter().position(|c| c.priority > priority).unwrap_or(callbacks.len());
        callbacks.insert(position, CallbackEntry { id, priority, callback: Rc::new(callback) });
        id
    }

    /// Remove a callback. Unknown ids are ignored.
    pub fn unsubscribe_callback(&self, id: CallbackId) {
        self.inner.callbacks.borrow_mut().retain(|c| c.id != id);
    }

    /// Start `process` with the trigger value on every trigger, subject to `mode`.
    pub fn subscribe_process<F, Fut>(&self, mode: ProcessMode, process: F) -> ProcessId
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let id = ProcessId(self.next_id());
        let process: ProcessFn<T> = Rc::new(move |value| Box::pin(process(value)));
        self.inner.processes.borrow_mut().push(Rc::new(ProcessSubscription {
            id,
            mode,
            process,
            running: Cell::new(false),
            backlog: RefCell::new(VecDeque::new()),
            overflow_reported: Cell::new(false),
        }));
        id
    }

    /// Remove a process subscription. Instances already running are not affected.
    pub fn unsubscribe_process(&self, id: ProcessId) {
        self.inner.processes.borrow_mut().retain(|p| p.id != id);
    }

    /// Publish `value` to all subscribers.
    ///
    /// Subscribers added or removed by a callback during this call take effect from
    /// the next trigger on.
    pub fn trigger(&self, value: T) {
        trace!("{} triggered", self.inner.name);
        let callbacks: Vec<Callback<T>> = self.inner.callbacks.borrow().iter().map(|c| c.callback.clone()).collect();
        for callback in callbacks {
            callback(&value);
        }

        let processes: Vec<_> = self.inner.processes.borrow().clone();
        for subscription in processes {
            self.start_process(&subscription, value.clone());
        }

        let event = self.inner.event.borrow_mut().take();
        if let Some(event) = event {
            event.succeed(value);
        }
    }

    fn start_process(&self, subscription: &Rc<ProcessSubscription<T>>, value: T) {
        match subscription.mode {
            ProcessMode::NonBlocking => self.inner.ctx.spawn((subscription.process)(value)),
            ProcessMode::Blocking => {
                if subscription.running.get() {
                    debug!("{}: process still running, trigger dropped", self.inner.name);
                    return;
                }
                subscription.running.set(true);
                let subscription = subscription.clone();
                self.inner.ctx.spawn(async move {
                    (subscription.process)(value).await;
                    subscription.running.set(false);
                });
            }
            ProcessMode::Queued => {
                if subscription.running.get() {
                    let mut backlog = subscription.backlog.borrow_mut();
                    backlog.push_back(value);
                    if backlog.len() >= QUEUE_WARNING_THRESHOLD {
                        if !subscription.overflow_reported.replace(true) {
                            error!("{}: {} trigger values are waiting for a queued process", self.inner.name, backlog.len());
                        }
                    } else {
                        subscription.overflow_reported.set(false);
                    }
                    return;
                }
                subscription.running.set(true);
                let subscription = subscription.clone();
                self.inner.ctx.spawn(async move {
                    let mut next = Some(value);
                    while let Some(value) = next {
                        (subscription.process)(value).await;
                        next = subscription.backlog.borrow_mut().pop_front();
                    }
                    subscription.running.set(false);
                });
            }
        }
    }

    /// The pending one-shot event for the next trigger.
    ///
    /// Repeated calls return the same event until the notifier is triggered; the
    /// following call creates a fresh one.
    pub fn event(&self) -> Event<T> {
        self.inner.event.borrow_mut().get_or_insert_with(Event::new).clone()
    }

    /// Wait for the next trigger.
    pub fn wait(&self) -> EventWait<T> {
        self.event().wait()
    }
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Notifier('{}')", self.inner.name)
    }
}
