//! MAC layers of a networked control system.
//!
//! Sensors, actuators and the gateway each run their own MAC on top of a
//! [`SimplePhy`](crate::physical::SimplePhy). The gateway announces schedules;
//! sensors and actuators follow them. Every MAC module has two gates: `phy`
//! towards the physical layer and `network` towards the application.

pub mod actuator;
pub mod address;
pub mod gateway;
pub mod headers;
pub mod sensor;

use log::trace;
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::construction::{Gate, Module, StackLayer};
use crate::devices::Device;
use crate::error::{SimError, SimResult};
use crate::messages::{Header, Message, Packet, Payload, Reply, StackCommand, StackMessage};
use crate::physical::Mcs;
use crate::simulation::SimContext;

pub use actuator::ActuatorMac;
pub use address::{AddressAllocator, MacAddress};
pub use gateway::GatewayMac;
pub use headers::{FrameKind, MacProtocol, NcsMacHeader};
pub use sensor::SensorMac;

/// Name of the gate facing the PHY.
pub const PHY_GATE: &str = "phy";
/// Name of the gate facing the application.
pub const NETWORK_GATE: &str = "network";

/// Slot length used when none is configured.
pub const DEFAULT_SLOT_LENGTH: Duration = Duration::from_millis(10);

/// Settings shared by every MAC of a network.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MacConfig {
    pub protocol: MacProtocol,
    pub transmission_power_dbm: f64,
    /// Length of one schedule slot in seconds.
    pub slot_length_secs: f64,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            protocol: MacProtocol::Tdma,
            transmission_power_dbm: 0.0,
            slot_length_secs: DEFAULT_SLOT_LENGTH.as_secs_f64(),
        }
    }
}

impl MacConfig {
    pub fn slot_length(&self) -> Duration {
        Duration::try_from_secs_f64(self.slot_length_secs).unwrap_or(DEFAULT_SLOT_LENGTH)
    }
}

/// A frame handed to the PHY.
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub time: Duration,
    pub kind: FrameKind,
    pub destination: Option<MacAddress>,
}

/// Behaviour every MAC variant shares.
pub trait MacLayer: StackLayer<StackMessage> {
    fn address(&self) -> MacAddress;

    fn protocol(&self) -> MacProtocol;

    fn phy_gate(&self) -> &Gate<StackMessage>;

    fn network_gate(&self) -> &Gate<StackMessage>;

    /// Whether incoming frames are currently processed.
    fn is_receiving(&self) -> bool;

    /// Every frame this MAC has handed to its PHY.
    fn sent_frames(&self) -> Vec<SentFrame>;
}

/// State and plumbing shared by the MAC variants.
pub(crate) struct MacCore {
    pub(crate) ctx: SimContext,
    pub(crate) module: Module<StackMessage>,
    pub(crate) phy: Gate<StackMessage>,
    pub(crate) network: Gate<StackMessage>,
    pub(crate) address: MacAddress,
    pub(crate) config: MacConfig,
    pub(crate) mcs: Rc<dyn Mcs>,
    pub(crate) receiving: Cell<bool>,
    sent: RefCell<Vec<SentFrame>>,
}

impl MacCore {
    pub(crate) fn new(
        ctx: &SimContext,
        device: &Device,
        address: MacAddress,
        config: MacConfig,
        mcs: Rc<dyn Mcs>,
    ) -> SimResult<Self> {
        let module = Module::with_owner(ctx, device.name(), "Mac");
        let phy = module.add_gate(PHY_GATE)?;
        let network = module.add_gate(NETWORK_GATE)?;
        Ok(Self {
            ctx: ctx.clone(),
            module,
            phy,
            network,
            address,
            config,
            mcs,
            receiving: Cell::new(true),
            sent: RefCell::new(Vec::new()),
        })
    }

    /// Start of `slot` for a schedule counted from `clock`.
    pub(crate) fn slot_start(&self, clock: Duration, slot: u32) -> Duration {
        clock + self.config.slot_length() * slot
    }

    /// Index of the slot running at `now` for a schedule counted from `clock`.
    pub(crate) fn current_slot(&self, clock: Duration, now: Duration) -> u32 {
        let slot = self.config.slot_length().as_nanos().max(1);
        (now.saturating_sub(clock).as_nanos() / slot) as u32
    }

    /// Send a frame and wait until it has left the antenna.
    pub(crate) async fn transmit(&self, kind: FrameKind, destination: Option<MacAddress>, payload: Payload) {
        let header = NcsMacHeader::new(self.config.protocol, kind, self.address, destination);
        let packet = Packet::new(Header::Ncs(header), payload);
        trace!("{}: sending {}", self.module, packet);
        self.sent.borrow_mut().push(SentFrame { time: self.ctx.now(), kind, destination });
        let message = Message::new(StackCommand::Send {
            packet,
            power_dbm: self.config.transmission_power_dbm,
            header_mcs: self.mcs.clone(),
            payload_mcs: self.mcs.clone(),
        });
        self.phy.output.send(StackMessage::Command(message.clone()));
        message.processed().wait().await;
    }

    /// [`transmit`](Self::transmit) with reception suspended until the frame is out.
    pub(crate) async fn transmit_deaf(&self, kind: FrameKind, destination: Option<MacAddress>, payload: Payload) {
        self.receiving.set(false);
        self.transmit(kind, destination, payload).await;
        self.receiving.set(true);
    }

    /// Ask the PHY whether the medium is busy.
    pub(crate) async fn sense(&self) -> bool {
        let message = Message::new(StackCommand::Sense);
        self.phy.output.send(StackMessage::Command(message.clone()));
        matches!(message.processed().wait().await, Reply::ChannelBusy(true))
    }

    /// Hand a command to the application.
    pub(crate) fn send_up(&self, command: StackCommand) {
        self.network.output.send(StackMessage::Command(Message::new(command)));
    }

    /// The NCS header of `packet`; anything else is a wiring error.
    pub(crate) fn ncs_header<'a>(&self, packet: &'a Packet) -> SimResult<&'a NcsMacHeader> {
        match packet.header() {
            Header::Ncs(header) => Ok(header),
            other => Err(SimError::UnexpectedHeader {
                layer: self.module.path().to_string(),
                got: other.kind_name(),
            }),
        }
    }

    pub(crate) fn unexpected(&self, got: impl Into<String>) -> SimError {
        SimError::UnexpectedMessage {
            layer: self.module.path().to_string(),
            got: got.into(),
        }
    }

    pub(crate) fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.borrow().clone()
    }
}

macro_rules! impl_mac_layer {
    ($($ty:ty),*) => {
        $(
            impl StackLayer<StackMessage> for $ty {
                fn module(&self) -> &Module<StackMessage> {
                    &self.core().module
                }
            }

            impl MacLayer for $ty {
                fn address(&self) -> MacAddress {
                    self.core().address
                }

                fn protocol(&self) -> MacProtocol {
                    self.core().config.protocol
                }

                fn phy_gate(&self) -> &Gate<StackMessage> {
                    &self.core().phy
                }

                fn network_gate(&self) -> &Gate<StackMessage> {
                    &self.core().network
                }

                fn is_receiving(&self) -> bool {
                    self.core().receiving.get()
                }

                fn sent_frames(&self) -> Vec<SentFrame> {
                    self.core().sent_frames()
                }
            }
        )*
    };
}

impl_mac_layer!(SensorMac, ActuatorMac, GatewayMac);
