//! Channel access schedules.
//!
//! A scheduler decides, per slot, which device may use the channel. The MACs only
//! consume the result: a [`TdmaSchedule`] (one device per slot) or a
//! [`CsmaSchedule`] (a transmit probability per device). Both have a textual form
//! and a size on the air, which determines how long the gateway's announcement
//! occupies the channel.
//!
//! Slots are numbered from 1. Slot `s` of a schedule announced with clock `c`
//! starts at `c + s·slot_length`; slot 0 is taken by the announcement itself.

pub mod scheduler;

pub use scheduler::{FixedCsmaScheduler, Role, RoundRobinTdmaScheduler, Scheduler};

use log::debug;
use std::fmt;
use std::str::FromStr;

use crate::error::{SimError, SimResult};
use crate::mac::MacAddress;

/// Flag value of a slot in which the device itself transmits.
pub const FLAG_TRANSMIT: u8 = 0;
/// Flag value of a slot reserved for the gateway's control frame to the device.
pub const FLAG_CONTROL: u8 = 1;

/// Assignment of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub address: MacAddress,
    pub flag: u8,
}

impl SlotAssignment {
    pub fn new(address: MacAddress, flag: u8) -> Self {
        Self { address, flag }
    }
}

/// Run of consecutive slots with the same assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdmaEntry {
    pub start_slot: u32,
    pub address: MacAddress,
    pub flag: u8,
    pub length: u32,
}

impl TdmaEntry {
    /// First slot after the run.
    pub fn end_slot(&self) -> u32 {
        self.start_slot + self.length
    }
}

/// Time-division schedule: every slot belongs to exactly one device.
#[derive(Debug, Clone, PartialEq)]
pub struct TdmaSchedule {
    action: Vec<SlotAssignment>,
    entries: Vec<TdmaEntry>,
}

impl TdmaSchedule {
    /// Compact a per-slot assignment list into runs.
    pub fn new(action: Vec<SlotAssignment>) -> Self {
        let mut entries: Vec<TdmaEntry> = Vec::new();
        for (index, assignment) in action.iter().enumerate() {
            match entries.last_mut() {
                Some(last) if last.address == assignment.address && last.flag == assignment.flag => last.length += 1,
                _ => entries.push(TdmaEntry {
                    start_slot: index as u32 + 1,
                    address: assignment.address,
                    flag: assignment.flag,
                    length: 1,
                }),
            }
        }
        let schedule = Self { action, entries };
        debug!("TDMA schedule created: {}", schedule);
        schedule
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (MacAddress, u8)>) -> Self {
        Self::new(pairs.into_iter().map(|(address, flag)| SlotAssignment::new(address, flag)).collect())
    }

    /// The per-slot assignments this schedule was built from.
    pub fn assignments(&self) -> &[SlotAssignment] {
        &self.action
    }

    pub fn entries(&self) -> &[TdmaEntry] {
        &self.entries
    }

    pub fn slot_count(&self) -> u32 {
        self.action.len() as u32
    }

    /// Sentinel slot right after the last one.
    pub fn end_slot(&self) -> u32 {
        self.slot_count() + 1
    }

    /// First run of `address` starting after `last_slot`, as `(start, end)` with `end` exclusive.
    pub fn next_relevant_timespan(&self, address: MacAddress, last_slot: u32) -> Option<(u32, u32)> {
        self.entries
            .iter()
            .find(|e| e.address == address && e.start_slot > last_slot)
            .map(|e| (e.start_slot, e.end_slot()))
    }

    /// Like [`TdmaSchedule::next_relevant_timespan`], restricted to runs with `flag`.
    pub fn next_span_with_flag(&self, address: MacAddress, flag: u8, last_slot: u32) -> Option<(u32, u32)> {
        self.entries
            .iter()
            .find(|e| e.address == address && e.flag == flag && e.start_slot > last_slot)
            .map(|e| (e.start_slot, e.end_slot()))
    }

    /// Every slot reserved for a control frame, with the device it is addressed to.
    pub fn control_slots(&self) -> Vec<(u32, MacAddress)> {
        self.entries
            .iter()
            .filter(|e| e.flag == FLAG_CONTROL)
            .flat_map(|e| (e.start_slot..e.end_slot()).map(move |slot| (slot, e.address)))
            .collect()
    }

    /// Size of the announcement payload in bytes.
    pub fn byte_size(&self, compressed: bool) -> usize {
        tdma_encode(self, compressed)
    }
}

impl fmt::Display for TdmaSchedule {
    /// `start address flag length` per run, then the sentinel slot.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{} {} {} {} ", entry.start_slot, entry.address, entry.flag, entry.length)?;
        }
        write!(f, "{}", self.end_slot())
    }
}

impl FromStr for TdmaSchedule {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let invalid = |why: &str| SimError::InvalidSchedule(format!("{} in '{}'", why, s));
        if tokens.is_empty() || tokens.len() % 4 != 1 {
            return Err(invalid("wrong number of tokens"));
        }
        let number = |token: &str| token.parse::<u32>().map_err(|_| invalid("not a number"));

        let mut action = Vec::new();
        for entry in tokens[..tokens.len() - 1].chunks(4) {
            let start = number(entry[0])?;
            if start as usize != action.len() + 1 {
                return Err(invalid("runs are not contiguous"));
            }
            let address: MacAddress = entry[1].parse()?;
            let flag = entry[2].parse::<u8>().map_err(|_| invalid("bad flag"))?;
            let length = number(entry[3])?;
            if length == 0 {
                return Err(invalid("empty run"));
            }
            action.extend((0..length).map(|_| SlotAssignment::new(address, flag)));
        }
        if number(tokens[tokens.len() - 1])? as usize != action.len() + 1 {
            return Err(invalid("sentinel does not close the last run"));
        }
        Ok(Self::new(action))
    }
}

/// Announcement size of a TDMA schedule in bytes.
///
/// One byte closes the schedule. Uncompressed, every run takes 7 bytes (address
/// plus slot and flag). Compressed, each slot costs 7 bytes the first time its
/// device appears and 3 bytes afterwards.
pub fn tdma_encode(schedule: &TdmaSchedule, compressed: bool) -> usize {
    let mut size = 1;
    if !compressed {
        return size + 7 * schedule.entries.len();
    }
    let mut seen: Vec<MacAddress> = Vec::new();
    for assignment in &schedule.action {
        if seen.contains(&assignment.address) {
            size += 3;
        } else {
            size += 7;
            seen.push(assignment.address);
        }
    }
    size
}

/// Contention schedule: each device transmits in a slot with its own probability.
#[derive(Debug, Clone, PartialEq)]
pub struct CsmaSchedule {
    probabilities: Vec<(MacAddress, f64)>,
    length: u32,
}

impl CsmaSchedule {
    /// Build a schedule valid for `length` slots.
    ///
    /// Probabilities must lie in `[0, 1]` and sum to at most 1.
    pub fn new(probabilities: Vec<(MacAddress, f64)>, length: u32) -> SimResult<Self> {
        if let Some((address, p)) = probabilities.iter().find(|(_, p)| !(0.0..=1.0).contains(p)) {
            return Err(SimError::InvalidSchedule(format!("probability {} of {} is outside [0, 1]", p, address)));
        }
        let sum: f64 = probabilities.iter().map(|(_, p)| p).sum();
        if sum > 1.0 + 1e-9 {
            return Err(SimError::ProbabilitySum { sum });
        }
        Ok(Self { probabilities, length })
    }

    pub fn probability(&self, address: MacAddress) -> Option<f64> {
        self.probabilities.iter().find(|(a, _)| *a == address).map(|(_, p)| *p)
    }

    pub fn probabilities(&self) -> &[(MacAddress, f64)] {
        &self.probabilities
    }

    /// Number of slots the schedule stays valid for.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Announcement size: one length byte plus address and probability byte per device.
    pub fn byte_size(&self) -> usize {
        1 + 7 * self.probabilities.len()
    }
}

impl fmt::Display for CsmaSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (address, p) in &self.probabilities {
            write!(f, "{} {} ", address, p)?;
        }
        write!(f, "{}", self.length)
    }
}

impl FromStr for CsmaSchedule {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let invalid = |why: &str| SimError::InvalidSchedule(format!("{} in '{}'", why, s));
        if tokens.len() % 2 != 1 {
            return Err(invalid("wrong number of tokens"));
        }
        let mut probabilities = Vec::new();
        for pair in tokens[..tokens.len() - 1].chunks(2) {
            let address: MacAddress = pair[0].parse()?;
            let p = pair[1].parse::<f64>().map_err(|_| invalid("bad probability"))?;
            probabilities.push((address, p));
        }
        let length = tokens[tokens.len() - 1].parse::<u32>().map_err(|_| invalid("bad length"))?;
        Self::new(probabilities, length)
    }
}

/// Either kind of schedule, as carried by an announcement.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Tdma(TdmaSchedule),
    Csma(CsmaSchedule),
}

impl Schedule {
    /// Announcement size in bytes. TDMA schedules are sent compressed.
    pub fn byte_size(&self) -> usize {
        match self {
            Schedule::Tdma(schedule) => schedule.byte_size(true),
            Schedule::Csma(schedule) => schedule.byte_size(),
        }
    }

    /// Number of slots after the announcement the schedule covers.
    pub fn slot_count(&self) -> u32 {
        match self {
            Schedule::Tdma(schedule) => schedule.slot_count(),
            Schedule::Csma(schedule) => schedule.length(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Tdma(schedule) => write!(f, "TDMA[{}]", schedule),
            Schedule::Csma(schedule) => write!(f, "CSMA[{}]", schedule),
        }
    }
}
