//! Objects exchanged over the simulated medium and between stack layers.
//!
//! Nothing here is serialized to bytes. Sizes are declared so that transmissions
//! take the right amount of air time.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::construction::MessageKind;
use crate::mac::{FrameKind, MacAddress, NcsMacHeader};
use crate::physical::Mcs;
use crate::schedule::Schedule;
use crate::simulation::Event;

/// Content of a transmittable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Vector(Vec<f64>),
    /// Placeholder with a size but no content.
    Empty,
}

/// Opaque value with a declared size on the air.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmittable {
    value: Value,
    byte_size: usize,
}

impl Transmittable {
    pub fn new(value: Value, byte_size: usize) -> Self {
        Self { value, byte_size }
    }

    /// Text sized by its UTF-8 length.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let byte_size = text.len();
        Self { value: Value::Text(text), byte_size }
    }

    /// Measurement vector sent as 4-byte floats.
    pub fn measurement(values: Vec<f64>) -> Self {
        let byte_size = 4 * values.len();
        Self { value: Value::Vector(values), byte_size }
    }

    /// Content-free value of the given size.
    pub fn sized(byte_size: usize) -> Self {
        Self { value: Value::Empty, byte_size }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}

impl fmt::Display for Transmittable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Text(text) => f.write_str(text),
            Value::Number(n) => write!(f, "{}", n),
            Value::Vector(values) => write!(f, "{:?}", values),
            Value::Empty => write!(f, "<{} bytes>", self.byte_size),
        }
    }
}

/// Packet header.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Ncs(NcsMacHeader),
    /// Anything not understood by the MAC layers, e.g. test traffic.
    Raw(Transmittable),
}

impl Header {
    pub fn byte_size(&self) -> usize {
        match self {
            Header::Ncs(header) => header.byte_size(),
            Header::Raw(raw) => raw.byte_size(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Header::Ncs(_) => "NcsMacHeader",
            Header::Raw(_) => "raw",
        }
    }
}

/// Schedule plus the clock its slots count from.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub schedule: Schedule,
    pub clock: Duration,
}

/// Packet payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Data(Transmittable),
    Announcement(Announcement),
    Packet(Rc<Packet>),
}

impl Payload {
    pub fn byte_size(&self) -> usize {
        match self {
            Payload::Data(data) => data.byte_size(),
            Payload::Announcement(announcement) => announcement.schedule.byte_size(),
            Payload::Packet(packet) => packet.byte_size(),
        }
    }
}

/// Header and payload. Never changes after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    header: Header,
    payload: Payload,
}

impl Packet {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (Header, Payload) {
        (self.header, self.payload)
    }

    pub fn byte_size(&self) -> usize {
        self.header.byte_size() + self.payload.byte_size()
    }

    pub fn bit_size(&self) -> usize {
        8 * self.byte_size()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = match &self.header {
            Header::Ncs(header) => header.to_string(),
            Header::Raw(raw) => raw.to_string(),
        };
        match &self.payload {
            Payload::Data(data) => write!(f, "Packet({}, {})", header, data),
            Payload::Announcement(a) => write!(f, "Packet({}, {} @ {:?})", header, a.schedule, a.clock),
            Payload::Packet(inner) => write!(f, "Packet({}, {})", header, inner),
        }
    }
}

/// Request from one layer to a neighbouring one.
#[derive(Debug, Clone)]
pub enum StackCommand {
    /// MAC to PHY: put a packet on the air.
    Send {
        packet: Packet,
        power_dbm: f64,
        header_mcs: Rc<dyn Mcs>,
        payload_mcs: Rc<dyn Mcs>,
    },
    /// MAC to PHY: is the medium busy? Answered with [`Reply::ChannelBusy`].
    Sense,
    /// Sensor application to sensor MAC: latest measurement.
    SendState { state: Transmittable },
    /// Controller to gateway MAC: announce a schedule.
    SendSchedule { schedule: Schedule, clock: Duration },
    /// Controller to gateway MAC: deliver a control value.
    SendControl { control: Transmittable, receiver: MacAddress },
    /// Gateway MAC to interpreter: a frame arrived.
    PacketReceived { sender: MacAddress, kind: FrameKind, payload: Payload },
    /// Actuator MAC to actuator application: a control value arrived.
    ControlReceived { control: Transmittable },
}

impl StackCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StackCommand::Send { .. } => "send",
            StackCommand::Sense => "sense",
            StackCommand::SendState { .. } => "send state",
            StackCommand::SendSchedule { .. } => "send schedule",
            StackCommand::SendControl { .. } => "send control",
            StackCommand::PacketReceived { .. } => "packet received",
            StackCommand::ControlReceived { .. } => "control received",
        }
    }
}

/// Answer to a command, delivered through its `processed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    ChannelBusy(bool),
}

/// A command plus the event the receiver resolves once it has handled it.
#[derive(Debug, Clone)]
pub struct Message {
    pub command: StackCommand,
    processed: Event<Reply>,
}

impl Message {
    pub fn new(command: StackCommand) -> Self {
        Self { command, processed: Event::new() }
    }

    pub fn processed(&self) -> &Event<Reply> {
        &self.processed
    }

    pub fn set_processed(&self, reply: Reply) {
        self.processed.succeed(reply);
    }
}

/// What travels through the gates of a stack.
#[derive(Debug, Clone)]
pub enum StackMessage {
    Packet(Packet),
    Command(Message),
}

impl StackMessage {
    pub const PACKET: &'static str = "Packet";
    pub const MESSAGE: &'static str = "Message";
}

impl MessageKind for StackMessage {
    fn kind_name(&self) -> &'static str {
        match self {
            StackMessage::Packet(_) => Self::PACKET,
            StackMessage::Command(_) => Self::MESSAGE,
        }
    }
}
