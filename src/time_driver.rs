//! Virtual time driver for the discrete-event executor.
//!
//! Time is kept as integer nanoseconds since the start of the simulation. Nothing
//! here ever looks at the host clock: the executor advances `now` straight to the
//! earliest pending deadline once every process has stalled, so simulated seconds
//! cost no real time.
//!
//! Pending timers live in a `BTreeMap` keyed by `(deadline, sequence)`, which keeps
//! wake-ups ordered by deadline and, for equal deadlines, by registration order.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

thread_local! {
    // Last time any clock on this thread advanced to. Only used to stamp log records.
    static CURRENT_NANOS: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Virtual time of the simulation most recently advanced on this thread.
///
/// Returns `None` outside of a simulation run. Intended for log formatting only;
/// components read time through their `SimContext`.
pub fn current_time() -> Option<Duration> {
    CURRENT_NANOS.with(|c| c.get()).map(Duration::from_nanos)
}

/// Key of a registered wake-up: deadline in nanoseconds plus a tie-breaking sequence number.
pub(crate) type TimerKey = (u64, u64);

#[derive(Default)]
pub(crate) struct VirtualClock {
    now: Cell<u64>,
    queue: RefCell<BTreeMap<TimerKey, Waker>>,
    sequence: Cell<u64>,
}

impl VirtualClock {
    pub(crate) fn now_ticks(&self) -> u64 {
        self.now.get()
    }

    /// Register (or refresh) the waker for a deadline. Returns the key under which it is stored.
    fn schedule_wake(&self, at: u64, key: Option<TimerKey>, waker: &Waker) -> TimerKey {
        let key = key.unwrap_or_else(|| {
            let seq = self.sequence.get();
            self.sequence.set(seq + 1);
            (at, seq)
        });
        let mut queue = self.queue.borrow_mut();
        match queue.get_mut(&key) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => *existing = waker.clone(),
            None => {
                queue.insert(key, waker.clone());
            }
        }
        key
    }

    fn cancel(&self, key: TimerKey) {
        self.queue.borrow_mut().remove(&key);
    }

    /// Earliest pending deadline, if any.
    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.queue.borrow().keys().next().map(|(at, _)| *at)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// Move virtual time forward. Time never goes backwards.
    pub(crate) fn advance_to(&self, at: u64) {
        let at = at.max(self.now.get());
        self.now.set(at);
        CURRENT_NANOS.with(|c| c.set(Some(at)));
    }

    /// Remove and return every waker whose deadline is not after `now`, in deadline order.
    pub(crate) fn take_due(&self) -> Vec<Waker> {
        let now = self.now.get();
        let mut queue = self.queue.borrow_mut();
        let later = queue.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut *queue, later);
        due.into_values().collect()
    }
}

/// Future completing once virtual time reaches its deadline.
///
/// Dropping an unfinished timer removes its entry from the queue, so a timer that
/// lost a `select` race does not keep the simulation alive.
pub struct Timer {
    clock: Rc<VirtualClock>,
    deadline: u64,
    key: Option<TimerKey>,
}

impl Timer {
    pub(crate) fn at(clock: Rc<VirtualClock>, deadline: u64) -> Self {
        Self { clock, deadline, key: None }
    }

    /// Deadline of this timer as time since the start of the simulation.
    pub fn deadline(&self) -> Duration {
        Duration::from_nanos(self.deadline)
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.clock.now_ticks() >= this.deadline {
            if let Some(key) = this.key.take() {
                this.clock.cancel(key);
            }
            return Poll::Ready(());
        }
        this.key = Some(this.clock.schedule_wake(this.deadline, this.key, cx.waker()));
        Poll::Pending
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.clock.cancel(key);
        }
    }
}

/// Convert a `Duration` to clock ticks, saturating instead of overflowing.
pub(crate) fn to_ticks(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
