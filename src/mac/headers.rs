//! Frame headers of the networked-control MAC protocols.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::address::MacAddress;

/// Channel access protocol a MAC runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacProtocol {
    #[default]
    Tdma,
    Csma,
}

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Schedule announcement from the gateway.
    Schedule,
    /// Measurement from a sensor.
    SensorData,
    /// Control value from the gateway to an actuator.
    Control,
    /// Acknowledgment of a control frame by an actuator.
    Ack,
}

impl FrameKind {
    /// Value of the type field on the air.
    pub fn type_byte(self) -> u8 {
        match self {
            FrameKind::Schedule => 0,
            FrameKind::SensorData => 1,
            FrameKind::Control => 2,
            FrameKind::Ack => 3,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Schedule => "schedule",
            FrameKind::SensorData => "sensor data",
            FrameKind::Control => "control",
            FrameKind::Ack => "ack",
        };
        f.write_str(name)
    }
}

/// Header of every frame exchanged by sensor, actuator and gateway MACs.
#[derive(Debug, Clone, PartialEq)]
pub struct NcsMacHeader {
    pub protocol: MacProtocol,
    pub kind: FrameKind,
    pub source: MacAddress,
    pub destination: Option<MacAddress>,
}

impl NcsMacHeader {
    pub fn new(protocol: MacProtocol, kind: FrameKind, source: MacAddress, destination: Option<MacAddress>) -> Self {
        Self { protocol, kind, source, destination }
    }

    /// Size on the air.
    ///
    /// Under TDMA the slot identifies the sender, so only the type byte is sent.
    /// Under CSMA every frame but the schedule also carries the source address.
    pub fn byte_size(&self) -> usize {
        match (self.protocol, self.kind) {
            (MacProtocol::Tdma, _) => 1,
            (MacProtocol::Csma, FrameKind::Schedule) => 1,
            (MacProtocol::Csma, _) => 7,
        }
    }

    pub fn is_for(&self, address: MacAddress) -> bool {
        match self.destination {
            Some(destination) => destination == address || destination == MacAddress::BROADCAST,
            None => true,
        }
    }
}

impl fmt::Display for NcsMacHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination {
            Some(destination) => write!(f, "{} {} -> {}", self.kind, self.source, destination),
            None => write!(f, "{} {}", self.kind, self.source),
        }
    }
}
