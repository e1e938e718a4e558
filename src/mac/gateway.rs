//! MAC of the gateway.
//!
//! The controller above the gateway issues `SendSchedule` and `SendControl`.
//! Schedules are broadcast right away; control values wait in a per-device queue
//! until the schedule offers a slot for them. Sensor data and acknowledgments
//! from registered devices are passed up as `PacketReceived`.

use log::{debug, info, trace};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use super::{FrameKind, MacAddress, MacConfig, MacCore, NETWORK_GATE, PHY_GATE};
use crate::construction::{GateListener, QueuePolicy};
use crate::devices::Device;
use crate::error::SimResult;
use crate::messages::{Announcement, Message, Payload, Reply, StackCommand, StackMessage, Transmittable};
use crate::physical::Mcs;
use crate::schedule::Schedule;
use crate::simulation::SimContext;

#[derive(Clone)]
pub struct GatewayMac {
    inner: Rc<GatewayInner>,
}

struct GatewayInner {
    core: MacCore,
    known: RefCell<BTreeSet<MacAddress>>,
    current: RefCell<Option<Announcement>>,
    generation: Cell<u64>,
    controls: RefCell<BTreeMap<MacAddress, VecDeque<Transmittable>>>,
    received: Cell<usize>,
}

impl GatewayMac {
    pub fn new(
        ctx: &SimContext,
        device: &Device,
        address: MacAddress,
        config: MacConfig,
        mcs: Rc<dyn Mcs>,
    ) -> SimResult<Self> {
        let core = MacCore::new(ctx, device, address, config, mcs)?;
        let inner = Rc::new(GatewayInner {
            core,
            known: RefCell::new(BTreeSet::new()),
            current: RefCell::new(None),
            generation: Cell::new(0),
            controls: RefCell::new(BTreeMap::new()),
            received: Cell::new(0),
        });

        let weak = Rc::downgrade(&inner);
        GateListener::new(PHY_GATE, "phy_gate_listener")
            .accepting(&[StackMessage::PACKET])
            .bind_callback(&inner.core.module, move |message: StackMessage| match weak.upgrade() {
                Some(mac) => mac.on_phy_message(message),
                None => Ok(()),
            })?;

        let weak = Rc::downgrade(&inner);
        GateListener::new(NETWORK_GATE, "network_gate_listener")
            .accepting(&[StackMessage::MESSAGE])
            .policy(QueuePolicy::Buffered)
            .bind_task(&inner.core.module, move |message: StackMessage| {
                let mac = weak.upgrade();
                async move {
                    match mac {
                        Some(mac) => mac.on_network_message(message).await,
                        None => Ok(()),
                    }
                }
            })?;

        Ok(Self { inner })
    }

    pub(crate) fn core(&self) -> &MacCore {
        &self.inner.core
    }

    /// Accept frames from `address` from now on.
    pub fn register_device(&self, address: MacAddress) {
        self.inner.known.borrow_mut().insert(address);
    }

    pub fn known_devices(&self) -> Vec<MacAddress> {
        self.inner.known.borrow().iter().copied().collect()
    }

    /// The schedule announced last, with its clock.
    pub fn current_schedule(&self) -> Option<Announcement> {
        self.inner.current.borrow().clone()
    }

    /// Control values still waiting for a slot.
    pub fn pending_controls(&self) -> usize {
        self.inner.controls.borrow().values().map(VecDeque::len).sum()
    }

    /// Frames passed up to the controller.
    pub fn received(&self) -> usize {
        self.inner.received.get()
    }
}

impl GatewayInner {
    fn on_phy_message(&self, message: StackMessage) -> SimResult<()> {
        let StackMessage::Packet(packet) = message else {
            return Err(self.core.unexpected("command from the PHY"));
        };
        let header = self.core.ncs_header(&packet)?;
        if !self.core.receiving.get() {
            trace!("{}: not receiving, {} ignored", self.core.module, header);
            return Ok(());
        }
        if !matches!(header.kind, FrameKind::SensorData | FrameKind::Ack) || !header.is_for(self.core.address) {
            trace!("{}: {} is not for the gateway", self.core.module, header);
            return Ok(());
        }
        if !self.known.borrow().contains(&header.source) {
            debug!("{}: {} from unknown device ignored", self.core.module, header);
            return Ok(());
        }
        self.received.set(self.received.get() + 1);
        self.core.send_up(StackCommand::PacketReceived {
            sender: header.source,
            kind: header.kind,
            payload: packet.payload().clone(),
        });
        Ok(())
    }

    async fn on_network_message(self: Rc<Self>, message: StackMessage) -> SimResult<()> {
        let StackMessage::Command(message) = message else {
            return Err(self.core.unexpected("packet from the controller"));
        };
        match message.command.clone() {
            StackCommand::SendSchedule { schedule, clock } => {
                self.announce(schedule, clock).await;
                message.set_processed(Reply::Done);
                Ok(())
            }
            StackCommand::SendControl { control, receiver } => {
                self.enqueue(&message, control, receiver);
                Ok(())
            }
            other => Err(self.core.unexpected(other.name())),
        }
    }

    fn enqueue(&self, message: &Message, control: Transmittable, receiver: MacAddress) {
        if self.known.borrow().contains(&receiver) {
            self.controls.borrow_mut().entry(receiver).or_default().push_back(control);
        } else {
            info!("{}: control for unknown device {} dropped", self.core.module, receiver);
        }
        message.set_processed(Reply::Done);
    }

    async fn announce(self: &Rc<Self>, schedule: Schedule, clock: Duration) {
        let announcement = Announcement { schedule, clock };
        debug!("{}: announcing {}", self.core.module, announcement.schedule);
        self.core
            .transmit_deaf(FrameKind::Schedule, Some(MacAddress::BROADCAST), Payload::Announcement(announcement.clone()))
            .await;

        self.current.replace(Some(announcement.clone()));
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let mac = self.clone();
        self.core.ctx.spawn(async move { mac.deliver_controls(generation, announcement).await });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }

    fn next_control(&self, receiver: Option<MacAddress>) -> Option<(MacAddress, Transmittable)> {
        let mut controls = self.controls.borrow_mut();
        let (address, queue) = match receiver {
            Some(address) => (address, controls.get_mut(&address)?),
            None => controls.iter_mut().find(|(_, q)| !q.is_empty()).map(|(a, q)| (*a, q))?,
        };
        queue.pop_front().map(|control| (address, control))
    }

    /// Send queued control values in the slots the schedule provides for them.
    async fn deliver_controls(&self, generation: u64, announcement: Announcement) {
        match &announcement.schedule {
            Schedule::Tdma(schedule) => {
                for (slot, address) in schedule.control_slots() {
                    self.core.ctx.timeout_until(self.core.slot_start(announcement.clock, slot)).await;
                    if !self.is_current(generation) {
                        return;
                    }
                    match self.next_control(Some(address)) {
                        Some((address, control)) => {
                            self.core.transmit_deaf(FrameKind::Control, Some(address), Payload::Data(control)).await
                        }
                        None => trace!("{}: control slot {} for {} unused", self.core.module, slot, address),
                    }
                }
            }
            Schedule::Csma(schedule) => {
                for slot in 1..=schedule.length() {
                    self.core.ctx.timeout_until(self.core.slot_start(announcement.clock, slot)).await;
                    if !self.is_current(generation) {
                        return;
                    }
                    if self.controls.borrow().values().all(VecDeque::is_empty) {
                        continue;
                    }
                    if self.core.sense().await {
                        trace!("{}: medium busy in slot {}", self.core.module, slot);
                        continue;
                    }
                    if let Some((address, control)) = self.next_control(None) {
                        self.core.transmit_deaf(FrameKind::Control, Some(address), Payload::Data(control)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::Gate;
    use crate::mac::test_support::Bench;
    use crate::mac::{MacLayer, MacProtocol, NcsMacHeader};
    use crate::messages::{Header, Packet};
    use crate::schedule::{CsmaSchedule, FLAG_CONTROL, FLAG_TRANSMIT, TdmaSchedule};

    fn gateway(bench: &mut Bench, config: MacConfig) -> (GatewayMac, Gate<StackMessage>, Rc<RefCell<Vec<StackCommand>>>) {
        let ctx = bench.ctx();
        let device = Device::new(&ctx, "gateway", 0.0, 0.0);
        let address = bench.allocator.allocate();
        let mac = GatewayMac::new(&ctx, &device, address, config, bench.mcs()).unwrap();
        bench.attach(&device, mac.phy_gate());
        let (app, seen) = bench.app("gateway", mac.network_gate());
        (mac, app, seen)
    }

    fn command(app: &Gate<StackMessage>, command: StackCommand) -> Message {
        let message = Message::new(command);
        app.output.send(StackMessage::Command(message.clone()));
        message
    }

    fn frame(kind: FrameKind, source: MacAddress, destination: MacAddress) -> Packet {
        let header = NcsMacHeader::new(MacProtocol::Tdma, kind, source, Some(destination));
        Packet::new(Header::Ncs(header), Payload::Data(Transmittable::measurement(vec![1.0])))
    }

    #[test]
    fn schedules_are_broadcast() {
        let mut bench = Bench::new();
        let (mac, app, _) = gateway(&mut bench, MacConfig::default());
        let listener = bench.radio("sensor", 10.0);
        let schedule = Schedule::Tdma(TdmaSchedule::from_pairs([(MacAddress::from_index(5), FLAG_TRANSMIT)]));
        let message = command(&app, StackCommand::SendSchedule { schedule: schedule.clone(), clock: Duration::ZERO });
        bench.sim.run().unwrap();

        assert_eq!(message.processed().value(), Some(Reply::Done));
        let frames = listener.frames(FrameKind::Schedule);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.destination, Some(MacAddress::BROADCAST));
        assert_eq!(frames[0].1, Payload::Announcement(Announcement { schedule, clock: Duration::ZERO }));
        assert_eq!(mac.current_schedule().map(|a| a.clock), Some(Duration::ZERO));
        assert!(mac.is_receiving());
    }

    #[test]
    fn controls_wait_for_the_receivers_control_slot() {
        let mut bench = Bench::new();
        let (mac, app, _) = gateway(&mut bench, MacConfig::default());
        let actuator = bench.radio("actuator", 10.0);
        let actuator_address = MacAddress::from_index(7);
        mac.register_device(actuator_address);

        command(&app, StackCommand::SendControl { control: Transmittable::measurement(vec![0.3]), receiver: actuator_address });
        let schedule = TdmaSchedule::from_pairs([
            (MacAddress::from_index(5), FLAG_TRANSMIT),
            (actuator_address, FLAG_CONTROL),
            (actuator_address, FLAG_TRANSMIT),
        ]);
        command(&app, StackCommand::SendSchedule { schedule: Schedule::Tdma(schedule), clock: Duration::ZERO });
        bench.sim.run().unwrap();

        let controls = actuator.frames(FrameKind::Control);
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].0.destination, Some(actuator_address));
        let sent: Vec<_> = mac.sent_frames().into_iter().filter(|f| f.kind == FrameKind::Control).collect();
        assert_eq!(sent[0].time, Duration::from_millis(20));
        assert_eq!(mac.pending_controls(), 0);
    }

    #[test]
    fn reception_is_suspended_while_a_control_is_sent() {
        let mut bench = Bench::new();
        let (mac, app, seen) = gateway(&mut bench, MacConfig::default());
        let _actuator = bench.radio("actuator", 10.0);
        let actuator_address = MacAddress::from_index(7);
        let sensor_address = MacAddress::from_index(5);
        mac.register_device(actuator_address);
        mac.register_device(sensor_address);

        command(&app, StackCommand::SendControl { control: Transmittable::measurement(vec![0.3]), receiver: actuator_address });
        let schedule = TdmaSchedule::from_pairs([(sensor_address, FLAG_TRANSMIT), (actuator_address, FLAG_CONTROL)]);
        command(&app, StackCommand::SendSchedule { schedule: Schedule::Tdma(schedule), clock: Duration::ZERO });

        // The control frame is on air from 20 ms + 1 µs for about 2.4 µs.
        bench.sim.run_until(Duration::from_millis(20) + Duration::from_micros(2)).unwrap();
        assert_eq!(mac.pending_controls(), 0);
        assert!(!mac.is_receiving());
        mac.phy_gate().input.send(StackMessage::Packet(frame(FrameKind::SensorData, sensor_address, mac.address())));
        assert_eq!(mac.received(), 0);

        bench.sim.run().unwrap();
        assert!(mac.is_receiving());
        mac.phy_gate().input.send(StackMessage::Packet(frame(FrameKind::SensorData, sensor_address, mac.address())));
        assert_eq!(mac.received(), 1);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn controls_for_unknown_devices_are_dropped() {
        let mut bench = Bench::new();
        let (mac, app, _) = gateway(&mut bench, MacConfig::default());
        let message = command(
            &app,
            StackCommand::SendControl { control: Transmittable::sized(4), receiver: MacAddress::from_index(9) },
        );
        bench.sim.run().unwrap();
        assert_eq!(message.processed().value(), Some(Reply::Done));
        assert_eq!(mac.pending_controls(), 0);
    }

    #[test]
    fn csma_controls_go_out_in_the_next_free_slot() {
        let mut bench = Bench::new();
        let config = MacConfig { protocol: MacProtocol::Csma, ..MacConfig::default() };
        let (mac, app, _) = gateway(&mut bench, config);
        let actuator = bench.radio("actuator", 10.0);
        let actuator_address = MacAddress::from_index(7);
        mac.register_device(actuator_address);

        command(&app, StackCommand::SendControl { control: Transmittable::sized(4), receiver: actuator_address });
        let schedule = CsmaSchedule::new(vec![(MacAddress::from_index(5), 0.5)], 4).unwrap();
        command(&app, StackCommand::SendSchedule { schedule: Schedule::Csma(schedule), clock: Duration::ZERO });
        bench.sim.run().unwrap();

        assert_eq!(actuator.frames(FrameKind::Control).len(), 1);
        let sent: Vec<_> = mac.sent_frames().into_iter().filter(|f| f.kind == FrameKind::Control).collect();
        assert_eq!(sent[0].time, Duration::from_millis(10));
    }

    #[test]
    fn data_from_registered_devices_is_passed_up() {
        let mut bench = Bench::new();
        let (mac, _app, seen) = gateway(&mut bench, MacConfig::default());
        let sensor = bench.radio("sensor", 10.0);
        let known = MacAddress::from_index(5);
        mac.register_device(known);

        sensor.send(frame(FrameKind::SensorData, known, mac.address()));
        bench.sim.run().unwrap();
        sensor.send(frame(FrameKind::SensorData, MacAddress::from_index(6), mac.address()));
        bench.sim.run().unwrap();
        sensor.send(frame(FrameKind::Ack, known, MacAddress::from_index(40)));
        bench.sim.run().unwrap();

        assert_eq!(mac.received(), 1);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            StackCommand::PacketReceived { sender, kind, .. } => {
                assert_eq!(*sender, known);
                assert_eq!(*kind, FrameKind::SensorData);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn raw_headers_abort_the_run() {
        let mut bench = Bench::new();
        let (_mac, _app, _) = gateway(&mut bench, MacConfig::default());
        let sensor = bench.radio("sensor", 10.0);
        sensor.send(Packet::new(Header::Raw(Transmittable::text("x")), Payload::Data(Transmittable::sized(3))));
        assert!(bench.sim.run().is_err());
    }
}
