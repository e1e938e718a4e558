//! One-shot events.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A value that becomes available exactly once.
///
/// Cloning an `Event` yields another handle to the same event. Any number of
/// processes may await it; callbacks attached with [`Event::on_trigger`] run
/// synchronously inside [`Event::succeed`], before any waiting process resumes.
pub struct Event<T> {
    inner: Rc<RefCell<EventState<T>>>,
}

struct EventState<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
    callbacks: Vec<Box<dyn FnOnce(&T)>>,
}

impl<T: Clone + 'static> Event<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EventState {
                value: None,
                wakers: Vec::new(),
                callbacks: Vec::new(),
            })),
        }
    }

    /// Resolve the event. Returns `false` (and changes nothing) if it already was.
    pub fn succeed(&self, value: T) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.inner.borrow_mut();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            (std::mem::take(&mut state.callbacks), std::mem::take(&mut state.wakers))
        };
        for callback in callbacks {
            callback(&value);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    pub fn value(&self) -> Option<T> {
        self.inner.borrow().value.clone()
    }

    /// Run `callback` when the event resolves, or right away if it already has.
    pub fn on_trigger(&self, callback: impl FnOnce(&T) + 'static) {
        let value = {
            let mut state = self.inner.borrow_mut();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&value);
    }

    /// Future resolving to the event's value.
    pub fn wait(&self) -> EventWait<T> {
        EventWait { event: self.clone() }
    }

    /// Whether both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("triggered", &self.inner.borrow().value.is_some()).finish()
    }
}

/// Future returned by [`Event::wait`].
pub struct EventWait<T> {
    event: Event<T>,
}

impl<T: Clone + 'static> Future for EventWait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.event.inner.borrow_mut();
        if let Some(value) = &state.value {
            return Poll::Ready(value.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Simulation;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn succeed_only_once() {
        let event = Event::new();
        assert!(event.succeed(1));
        assert!(!event.succeed(2));
        assert_eq!(event.value(), Some(1));
    }

    #[test]
    fn callbacks_run_before_waiters_resume() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let event: Event<u32> = Event::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let waiting = event.clone();
        let order2 = order.clone();
        ctx.spawn(async move {
            let value = waiting.wait().await;
            order2.borrow_mut().push(format!("process {}", value));
        });
        let order3 = order.clone();
        event.on_trigger(move |v| order3.borrow_mut().push(format!("callback {}", v)));

        let trigger = event.clone();
        let ctx2 = ctx.clone();
        ctx.spawn(async move {
            ctx2.timeout(Duration::from_millis(3)).await;
            trigger.succeed(7);
        });
        sim.run().unwrap();
        assert_eq!(*order.borrow(), vec!["callback 7".to_string(), "process 7".to_string()]);
    }

    #[test]
    fn late_callback_runs_immediately() {
        let event = Event::new();
        event.succeed("done");
        let seen = Rc::new(Cell::new(false));
        let seen2 = seen.clone();
        event.on_trigger(move |_| seen2.set(true));
        assert!(seen.get());
    }
}
