//! Schedule sources used by the scenario runner.
//!
//! These stand in for the external scheduler: they produce schedules without
//! looking at the state of the plants.

use log::debug;

use super::{CsmaSchedule, FLAG_CONTROL, FLAG_TRANSMIT, Schedule, SlotAssignment, TdmaSchedule};
use crate::error::SimResult;
use crate::mac::MacAddress;

/// Role of a device as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sensor,
    Actuator,
}

/// Hands slots to devices in turn.
///
/// A sensor gets one transmit slot. An actuator gets a control slot followed by a
/// transmit slot for its acknowledgment. The rotation continues across schedules.
#[derive(Debug)]
pub struct RoundRobinTdmaScheduler {
    devices: Vec<(MacAddress, Role)>,
    slots: u32,
    next_device: usize,
    was_actuator: bool,
}

impl RoundRobinTdmaScheduler {
    pub fn new(devices: Vec<(MacAddress, Role)>, slots: u32) -> Self {
        Self { devices, slots, next_device: 0, was_actuator: false }
    }

    pub fn next_schedule(&mut self) -> TdmaSchedule {
        let mut action = Vec::with_capacity(self.slots as usize);
        if self.devices.is_empty() {
            return TdmaSchedule::new(action);
        }
        for _ in 0..self.slots {
            let (address, role) = self.devices[self.next_device];
            let flag = match role {
                Role::Actuator if !self.was_actuator => {
                    self.was_actuator = true;
                    FLAG_CONTROL
                }
                Role::Actuator => {
                    self.was_actuator = false;
                    FLAG_TRANSMIT
                }
                Role::Sensor => FLAG_TRANSMIT,
            };
            action.push(SlotAssignment::new(address, flag));
            if !self.was_actuator {
                self.next_device = (self.next_device + 1) % self.devices.len();
            }
        }
        debug!("Round robin produced {} slots, next device index {}", action.len(), self.next_device);
        TdmaSchedule::new(action)
    }
}

/// Gives every sensor the same transmit probability.
#[derive(Debug)]
pub struct FixedCsmaScheduler {
    sensors: Vec<MacAddress>,
    probability: f64,
    length: u32,
}

impl FixedCsmaScheduler {
    pub fn new(sensors: Vec<MacAddress>, probability: f64, length: u32) -> Self {
        Self { sensors, probability, length }
    }

    /// Fails if the probabilities of all sensors add up to more than 1.
    pub fn next_schedule(&mut self) -> SimResult<CsmaSchedule> {
        CsmaSchedule::new(self.sensors.iter().map(|s| (*s, self.probability)).collect(), self.length)
    }
}

/// Schedule source driving a gateway.
#[derive(Debug)]
pub enum Scheduler {
    Tdma(RoundRobinTdmaScheduler),
    Csma(FixedCsmaScheduler),
}

impl Scheduler {
    pub fn next_schedule(&mut self) -> SimResult<Schedule> {
        match self {
            Scheduler::Tdma(scheduler) => Ok(Schedule::Tdma(scheduler.next_schedule())),
            Scheduler::Csma(scheduler) => scheduler.next_schedule().map(Schedule::Csma),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actuators_get_a_control_slot_then_a_transmit_slot() {
        let s = MacAddress::from_index(1);
        let a = MacAddress::from_index(2);
        let mut scheduler = RoundRobinTdmaScheduler::new(vec![(s, Role::Sensor), (a, Role::Actuator)], 4);
        let schedule = scheduler.next_schedule();
        let flags: Vec<_> = schedule.assignments().iter().map(|x| (x.address, x.flag)).collect();
        assert_eq!(flags, vec![(s, 0), (a, 1), (a, 0), (s, 0)]);

        // The rotation carries over into the next schedule.
        let next = scheduler.next_schedule();
        assert_eq!(next.assignments()[0], SlotAssignment::new(a, FLAG_CONTROL));
    }

    #[test]
    fn csma_scheduler_rejects_oversubscription() {
        let sensors = vec![MacAddress::from_index(1), MacAddress::from_index(2)];
        assert!(FixedCsmaScheduler::new(sensors.clone(), 0.5, 5).next_schedule().is_ok());
        assert!(FixedCsmaScheduler::new(sensors, 0.8, 5).next_schedule().is_err());
    }
}
