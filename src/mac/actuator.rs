//! MAC of an actuator.
//!
//! Listens for schedules and for control frames addressed to it. Every control
//! value is passed to the application and acknowledged to the gateway, in the
//! actuator's next transmit span when a TDMA schedule is known. The ACK names
//! the actuator and the control value it confirms.

use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{FrameKind, MacAddress, MacConfig, MacCore, NETWORK_GATE, PHY_GATE};
use crate::construction::GateListener;
use crate::devices::Device;
use crate::error::SimResult;
use crate::messages::{Announcement, Payload, StackCommand, StackMessage, Transmittable};
use crate::physical::Mcs;
use crate::schedule::{FLAG_TRANSMIT, Schedule};
use crate::simulation::{Notifier, ProcessMode, SimContext};

#[derive(Clone)]
pub struct ActuatorMac {
    inner: Rc<ActuatorInner>,
}

struct ActuatorInner {
    core: MacCore,
    gateway: Cell<Option<MacAddress>>,
    schedule: RefCell<Option<Announcement>>,
    acks: Notifier<(MacAddress, Transmittable)>,
    controls_received: Cell<usize>,
}

impl ActuatorMac {
    pub fn new(
        ctx: &SimContext,
        device: &Device,
        address: MacAddress,
        config: MacConfig,
        mcs: Rc<dyn Mcs>,
    ) -> SimResult<Self> {
        let core = MacCore::new(ctx, device, address, config, mcs)?;
        let acks = Notifier::new(ctx, format!("{}.acks", core.module.path()));
        let inner = Rc::new(ActuatorInner {
            core,
            gateway: Cell::new(None),
            schedule: RefCell::new(None),
            acks,
            controls_received: Cell::new(0),
        });

        let weak = Rc::downgrade(&inner);
        inner.acks.subscribe_process(ProcessMode::Queued, move |(gateway, control): (MacAddress, Transmittable)| {
            let mac = weak.upgrade();
            async move {
                if let Some(mac) = mac {
                    mac.acknowledge(gateway, control).await;
                }
            }
        });

        let weak = Rc::downgrade(&inner);
        GateListener::new(PHY_GATE, "phy_gate_listener")
            .accepting(&[StackMessage::PACKET])
            .bind_callback(&inner.core.module, move |message: StackMessage| match weak.upgrade() {
                Some(mac) => mac.on_phy_message(message),
                None => Ok(()),
            })?;

        let weak = Rc::downgrade(&inner);
        GateListener::new(NETWORK_GATE, "network_gate_listener").bind_callback(
            &inner.core.module,
            move |message: StackMessage| match weak.upgrade() {
                Some(mac) => Err(mac.core.unexpected(message_name(&message))),
                None => Ok(()),
            },
        )?;

        Ok(Self { inner })
    }

    pub(crate) fn core(&self) -> &MacCore {
        &self.inner.core
    }

    pub fn gateway(&self) -> Option<MacAddress> {
        self.inner.gateway.get()
    }

    pub fn controls_received(&self) -> usize {
        self.inner.controls_received.get()
    }
}

/// Text of an acknowledgment: the actuator's address and the confirmed control value.
pub fn ack_payload(address: MacAddress, control: &Transmittable) -> Transmittable {
    Transmittable::text(format!("{} {}", address, control))
}

fn message_name(message: &StackMessage) -> String {
    match message {
        StackMessage::Packet(_) => "packet".to_string(),
        StackMessage::Command(m) => m.command.name().to_string(),
    }
}

impl ActuatorInner {
    fn on_phy_message(&self, message: StackMessage) -> SimResult<()> {
        let StackMessage::Packet(packet) = message else {
            return Err(self.core.unexpected("command from the PHY"));
        };
        let header = self.core.ncs_header(&packet)?;
        if !self.core.receiving.get() {
            trace!("{}: not receiving, {} ignored", self.core.module, header);
            return Ok(());
        }
        match (header.kind, packet.payload()) {
            (FrameKind::Schedule, Payload::Announcement(announcement)) => {
                debug!("{}: schedule from {}", self.core.module, header.source);
                self.gateway.set(Some(header.source));
                self.schedule.replace(Some(announcement.clone()));
                Ok(())
            }
            (FrameKind::Control, Payload::Data(control)) if header.is_for(self.core.address) => {
                debug!("{}: control {} from {}", self.core.module, control, header.source);
                self.controls_received.set(self.controls_received.get() + 1);
                self.core.send_up(StackCommand::ControlReceived { control: control.clone() });
                self.acks.trigger((header.source, control.clone()));
                Ok(())
            }
            (FrameKind::Schedule | FrameKind::Control, _) if !header.is_for(self.core.address) => Ok(()),
            (FrameKind::Schedule | FrameKind::Control, _) => {
                Err(self.core.unexpected(format!("{} frame with a mismatching payload", header.kind)))
            }
            _ => {
                trace!("{}: {} is not for actuators", self.core.module, header);
                Ok(())
            }
        }
    }

    async fn acknowledge(&self, gateway: MacAddress, control: Transmittable) {
        let announcement = self.schedule.borrow().clone();
        if let Some(Announcement { schedule: Schedule::Tdma(schedule), clock }) = announcement {
            let now = self.core.ctx.now();
            let current = self.core.current_slot(clock, now);
            match schedule.next_span_with_flag(self.core.address, FLAG_TRANSMIT, current) {
                Some((start, _)) => self.core.ctx.timeout_until(self.core.slot_start(clock, start)).await,
                None => debug!("{}: no transmit span left, acknowledging right away", self.core.module),
            }
        }
        let ack = ack_payload(self.core.address, &control);
        self.core.transmit_deaf(FrameKind::Ack, Some(gateway), Payload::Data(ack)).await;
    }
}
