//! In-flight transmissions.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::mcs::Mcs;
use super::signal_calculations::bits_duration;
use crate::devices::Device;
use crate::error::{SimError, SimResult};
use crate::messages::Packet;
use crate::simulation::Event;

/// Identity of a transmission within one frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransmissionId(pub u64);

/// One packet on the air.
///
/// Timing is fixed at creation: the header is sent at the header MCS's data rate,
/// then the payload at the payload MCS's. The frequency band resolves
/// `header_completes` and `completes` when virtual time reaches the respective end.
#[derive(Debug)]
pub struct Transmission {
    id: TransmissionId,
    sender: Device,
    power_dbm: f64,
    header_mcs: Rc<dyn Mcs>,
    payload_mcs: Rc<dyn Mcs>,
    packet: Packet,
    start_time: Duration,
    header_bits: usize,
    payload_bits: usize,
    header_duration: Duration,
    payload_duration: Duration,
    header_completes: Event<()>,
    completes: Event<()>,
}

impl Transmission {
    pub(crate) fn new(
        id: TransmissionId,
        sender: Device,
        power_dbm: f64,
        header_mcs: Rc<dyn Mcs>,
        payload_mcs: Rc<dyn Mcs>,
        packet: Packet,
        start_time: Duration,
    ) -> SimResult<Self> {
        let header_bits = 8 * packet.header().byte_size();
        let payload_bits = 8 * packet.payload().byte_size();
        if header_bits + payload_bits == 0 {
            return Err(SimError::EmptyTransmission { sender: sender.name().to_string() });
        }
        let header_duration = bits_duration(header_bits, header_mcs.data_rate());
        let payload_duration = bits_duration(payload_bits, payload_mcs.data_rate());
        Ok(Self {
            id,
            sender,
            power_dbm,
            header_mcs,
            payload_mcs,
            packet,
            start_time,
            header_bits,
            payload_bits,
            header_duration,
            payload_duration,
            header_completes: Event::new(),
            completes: Event::new(),
        })
    }

    pub fn id(&self) -> TransmissionId {
        self.id
    }

    pub fn sender(&self) -> &Device {
        &self.sender
    }

    pub fn power_dbm(&self) -> f64 {
        self.power_dbm
    }

    pub fn header_mcs(&self) -> &Rc<dyn Mcs> {
        &self.header_mcs
    }

    pub fn payload_mcs(&self) -> &Rc<dyn Mcs> {
        &self.payload_mcs
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    pub fn header_bits(&self) -> usize {
        self.header_bits
    }

    pub fn payload_bits(&self) -> usize {
        self.payload_bits
    }

    pub fn header_duration(&self) -> Duration {
        self.header_duration
    }

    pub fn payload_duration(&self) -> Duration {
        self.payload_duration
    }

    pub fn duration(&self) -> Duration {
        self.header_duration + self.payload_duration
    }

    pub fn header_stop_time(&self) -> Duration {
        self.start_time + self.header_duration
    }

    pub fn stop_time(&self) -> Duration {
        self.start_time + self.duration()
    }

    pub fn header_completes(&self) -> &Event<()> {
        &self.header_completes
    }

    pub fn completes(&self) -> &Event<()> {
        &self.completes
    }

    pub fn is_completed(&self) -> bool {
        self.completes.is_triggered()
    }

    /// Whether the transmission is on the air during `[from, to]`.
    pub fn overlaps(&self, from: Duration, to: Duration) -> bool {
        self.start_time <= to && self.stop_time() >= from
    }
}

impl fmt::Display for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transmission#{}(from {}, {} dBm, {:?}..{:?})",
            self.id.0,
            self.sender,
            self.power_dbm,
            self.start_time,
            self.stop_time()
        )
    }
}
