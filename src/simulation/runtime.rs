//! Single-threaded discrete-event runtime.
//!
//! A [`Simulation`] owns a `futures` `LocalPool` and a [`VirtualClock`]. Running it
//! alternates two steps until the requested end time:
//!
//! 1. poll every ready process until all of them are stalled;
//! 2. advance virtual time to the earliest pending timer and wake its waiters.
//!
//! Components never hold the `Simulation` itself. They receive a cheap
//! [`SimContext`] handle that can read the clock, create timers, spawn processes,
//! draw random numbers and report fatal configuration errors. Because the pool is
//! only reachable from the `Simulation`, dropping it tears down every process.

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use log::{debug, error};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{SimError, SimResult};
use crate::time_driver::{Timer, VirtualClock, to_ticks};

/// Seed used by [`Simulation::new`].
pub const DEFAULT_SEED: u64 = 42;

/// Owner of the executor and the virtual clock.
pub struct Simulation {
    pool: LocalPool,
    context: SimContext,
}

/// Shared handle given to every simulated component.
#[derive(Clone)]
pub struct SimContext {
    inner: Rc<ContextInner>,
}

struct ContextInner {
    clock: Rc<VirtualClock>,
    spawner: LocalSpawner,
    fault: RefCell<Option<SimError>>,
    rng: RefCell<StdRng>,
    seed: u64,
    next_device_id: Cell<u32>,
}

impl Simulation {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create a simulation whose random draws are derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let pool = LocalPool::new();
        let context = SimContext {
            inner: Rc::new(ContextInner {
                clock: Rc::new(VirtualClock::default()),
                spawner: pool.spawner(),
                fault: RefCell::new(None),
                rng: RefCell::new(StdRng::seed_from_u64(seed)),
                seed,
                next_device_id: Cell::new(0),
            }),
        };
        Self { pool, context }
    }

    /// Handle to pass to components.
    pub fn context(&self) -> SimContext {
        self.context.clone()
    }

    pub fn now(&self) -> Duration {
        self.context.now()
    }

    /// Run all processes until virtual time reaches `until`.
    ///
    /// Returns early with the first configuration error reported by any component.
    /// On success the clock reads exactly `until` afterwards, even if nothing was
    /// scheduled that late.
    pub fn run_until(&mut self, until: Duration) -> SimResult<()> {
        self.drive(Some(to_ticks(until)))
    }

    /// Run the simulation for `duration` past the current time.
    pub fn run_for(&mut self, duration: Duration) -> SimResult<()> {
        let until = self.now() + duration;
        self.run_until(until)
    }

    /// Run until no process is ready and no timer is pending.
    pub fn run(&mut self) -> SimResult<()> {
        self.drive(None)
    }

    /// Alternate polling and advancing the clock; without `until`, stop once idle.
    fn drive(&mut self, until: Option<u64>) -> SimResult<()> {
        let clock = self.context.inner.clock.clone();
        loop {
            self.pool.run_until_stalled();
            if let Some(err) = self.context.take_fault() {
                error!("Simulation aborted at {:?}: {}", self.context.now(), err);
                return Err(err);
            }
            match (clock.next_deadline(), until) {
                (Some(at), None) => clock.advance_to(at),
                (Some(at), Some(until)) if at <= until => clock.advance_to(at),
                (_, Some(until)) => {
                    clock.advance_to(until);
                    return Ok(());
                }
                (None, None) => {
                    debug!("Simulation idle at {:?}", self.context.now());
                    return Ok(());
                }
            }
            for waker in clock.take_due() {
                waker.wake();
            }
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl SimContext {
    /// Current virtual time since the start of the simulation.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.inner.clock.now_ticks())
    }

    /// Current virtual time in seconds.
    pub fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }

    /// Timer completing `duration` after now.
    pub fn timeout(&self, duration: Duration) -> Timer {
        let deadline = self.inner.clock.now_ticks().saturating_add(to_ticks(duration));
        Timer::at(self.inner.clock.clone(), deadline)
    }

    /// Timer completing at the absolute virtual time `at`. Completes immediately if `at` has passed.
    pub fn timeout_until(&self, at: Duration) -> Timer {
        Timer::at(self.inner.clock.clone(), to_ticks(at))
    }

    /// Timer completing at the start of the next slot of length `slot`.
    ///
    /// When the clock sits exactly on a slot boundary the timer waits a full slot.
    pub fn next_time_slot(&self, slot: Duration) -> Timer {
        let slot = to_ticks(slot).max(1);
        let now = self.inner.clock.now_ticks();
        Timer::at(self.inner.clock.clone(), now.saturating_add(slot - now % slot))
    }

    /// Launch a process on the simulation's executor.
    pub fn spawn<F>(&self, process: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if let Err(e) = self.inner.spawner.spawn_local(process) {
            error!("Failed to spawn process, simulation already shut down: {}", e);
        }
    }

    /// Report a fatal configuration error. The first reported error wins.
    pub fn fail(&self, err: SimError) {
        let mut fault = self.inner.fault.borrow_mut();
        if fault.is_none() {
            error!("Configuration error: {}", err);
            *fault = Some(err);
        } else {
            debug!("Ignoring follow-up error: {}", err);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.inner.fault.borrow().is_some()
    }

    fn take_fault(&self) -> Option<SimError> {
        self.inner.fault.borrow_mut().take()
    }

    /// Seed the simulation was created with. Components derive their own generators from it.
    pub fn seed(&self) -> u64 {
        self.inner.seed
    }

    /// Draw from the simulation-wide random number generator.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.inner.rng.borrow_mut())
    }

    pub(crate) fn allocate_device_id(&self) -> u32 {
        let id = self.inner.next_device_id.get();
        self.inner.next_device_id.set(id + 1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_fire_in_virtual_time_order() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (name, delay) in [("slow", 30), ("fast", 10), ("mid", 20)] {
            let ctx2 = ctx.clone();
            let log = log.clone();
            ctx.spawn(async move {
                ctx2.timeout(Duration::from_millis(delay)).await;
                log.borrow_mut().push((name, ctx2.now()));
            });
        }
        sim.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                ("fast", Duration::from_millis(10)),
                ("mid", Duration::from_millis(20)),
                ("slow", Duration::from_millis(30)),
            ]
        );
    }

    #[test]
    fn run_until_stops_at_the_requested_time() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        let ctx2 = ctx.clone();
        ctx.spawn(async move {
            ctx2.timeout(Duration::from_secs(5)).await;
            fired2.set(true);
        });
        sim.run_until(Duration::from_secs(2)).unwrap();
        assert_eq!(sim.now(), Duration::from_secs(2));
        assert!(!fired.get());
        sim.run_until(Duration::from_secs(5)).unwrap();
        assert!(fired.get());
    }

    #[test]
    fn next_time_slot_waits_a_full_slot_on_a_boundary() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let slot = Duration::from_micros(1);
        assert_eq!(ctx.next_time_slot(slot).deadline(), slot);

        sim.run_until(Duration::from_nanos(2_300)).unwrap();
        assert_eq!(ctx.next_time_slot(slot).deadline(), Duration::from_nanos(3_000));
    }

    #[test]
    fn run_drains_every_timer_and_then_stops() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let ticks = Rc::new(Cell::new(0));
        let counter = ticks.clone();
        let ctx2 = ctx.clone();
        ctx.spawn(async move {
            for _ in 0..3 {
                ctx2.timeout(Duration::from_millis(4)).await;
                counter.set(counter.get() + 1);
            }
        });
        sim.run().unwrap();
        assert_eq!(ticks.get(), 3);
        assert_eq!(sim.now(), Duration::from_millis(12));
        // Nothing left: a bounded run only moves the clock.
        sim.run_until(Duration::from_millis(20)).unwrap();
        assert_eq!(sim.now(), Duration::from_millis(20));
        sim.run().unwrap();
        assert_eq!(sim.now(), Duration::from_millis(20));
    }

    #[test]
    fn reported_fault_aborts_an_unbounded_run() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let ctx2 = ctx.clone();
        ctx.spawn(async move {
            ctx2.timeout(Duration::from_millis(3)).await;
            ctx2.fail(SimError::InvalidSchedule("late".into()));
        });
        assert_eq!(sim.run().unwrap_err(), SimError::InvalidSchedule("late".into()));
        assert_eq!(sim.now(), Duration::from_millis(3));
    }

    #[test]
    fn reported_fault_aborts_the_run() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let ctx2 = ctx.clone();
        ctx.spawn(async move {
            ctx2.timeout(Duration::from_millis(1)).await;
            ctx2.fail(SimError::InvalidSchedule("broken".into()));
        });
        let err = sim.run_until(Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, SimError::InvalidSchedule("broken".into()));
        assert_eq!(sim.now(), Duration::from_millis(1));
    }
}
