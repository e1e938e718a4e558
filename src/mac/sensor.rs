//! MAC of a sensor.
//!
//! The application hands over measurements with `SendState`; only the latest one
//! is kept, and it is sent again in every opportunity until it is replaced. When a schedule announcement arrives the MAC walks through it and
//! sends the buffered measurement in its slots (TDMA) or contends for slots
//! (CSMA). Announcements arriving during a walk are ignored.

use log::{debug, trace, warn};
use rand::Rng;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{FrameKind, MacConfig, MacCore, MacAddress, NETWORK_GATE, PHY_GATE};
use crate::construction::GateListener;
use crate::devices::Device;
use crate::error::SimResult;
use crate::messages::{Announcement, Payload, Reply, StackCommand, StackMessage, Transmittable};
use crate::physical::Mcs;
use crate::schedule::{CsmaSchedule, Schedule, TdmaSchedule};
use crate::simulation::{Notifier, ProcessMode, SimContext};

#[derive(Clone)]
pub struct SensorMac {
    inner: Rc<SensorInner>,
}

struct SensorInner {
    core: MacCore,
    gateway: Cell<Option<MacAddress>>,
    latest: RefCell<Option<Transmittable>>,
    announcements: Notifier<Announcement>,
    skipped_spans: Cell<usize>,
}

impl SensorMac {
    pub fn new(
        ctx: &SimContext,
        device: &Device,
        address: MacAddress,
        config: MacConfig,
        mcs: Rc<dyn Mcs>,
    ) -> SimResult<Self> {
        let core = MacCore::new(ctx, device, address, config, mcs)?;
        let announcements = Notifier::new(ctx, format!("{}.announcements", core.module.path()));
        let inner = Rc::new(SensorInner {
            core,
            gateway: Cell::new(None),
            latest: RefCell::new(None),
            announcements,
            skipped_spans: Cell::new(0),
        });

        let weak = Rc::downgrade(&inner);
        inner.announcements.subscribe_process(ProcessMode::Queued, move |announcement: Announcement| {
            let mac = weak.upgrade();
            async move {
                if let Some(mac) = mac {
                    mac.follow(announcement).await;
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
        GateListener::new(NETWORK_GATE, "network_gate_listener")
            .accepting(&[StackMessage::MESSAGE])
            .bind_callback(&inner.core.module, move |message: StackMessage| match weak.upgrade() {
                Some(mac) => mac.on_network_message(message),
                None => Ok(()),
            })?;

        Ok(Self { inner })
    }

    pub(crate) fn core(&self) -> &MacCore {
        &self.inner.core
    }

    /// Address of the gateway whose schedule was received last.
    pub fn gateway(&self) -> Option<MacAddress> {
        self.inner.gateway.get()
    }

    /// Latest measurement handed over by the application.
    pub fn buffered_state(&self) -> Option<Transmittable> {
        self.inner.latest.borrow().clone()
    }

    /// Assigned spans that had already started when the schedule arrived.
    pub fn skipped_spans(&self) -> usize {
        self.inner.skipped_spans.get()
    }
}

impl SensorInner {
    fn on_phy_message(&self, message: StackMessage) -> SimResult<()> {
        let StackMessage::Packet(packet) = message else {
            return Err(self.core.unexpected("command from the PHY"));
        };
        let header = self.core.ncs_header(&packet)?;
        if !self.core.receiving.get() {
            trace!("{}: not receiving, {} ignored", self.core.module, header);
            return Ok(());
        }
        if header.kind != FrameKind::Schedule {
            trace!("{}: {} is not for sensors", self.core.module, header);
            return Ok(());
        }
        let Payload::Announcement(announcement) = packet.payload() else {
            return Err(self.core.unexpected("schedule frame without an announcement"));
        };
        debug!("{}: schedule from {}", self.core.module, header.source);
        self.gateway.set(Some(header.source));
        self.announcements.trigger(announcement.clone());
        Ok(())
    }

    fn on_network_message(&self, message: StackMessage) -> SimResult<()> {
        let StackMessage::Command(message) = message else {
            return Err(self.core.unexpected("packet from the application"));
        };
        match &message.command {
            StackCommand::SendState { state } => {
                trace!("{}: buffering {}", self.core.module, state);
                self.latest.replace(Some(state.clone()));
                message.set_processed(Reply::Done);
                Ok(())
            }
            other => Err(self.core.unexpected(other.name())),
        }
    }

    async fn follow(&self, announcement: Announcement) {
        self.core.receiving.set(false);
        match &announcement.schedule {
            Schedule::Tdma(schedule) => self.walk_tdma(schedule, &announcement).await,
            Schedule::Csma(schedule) => self.contend(schedule, &announcement).await,
        }
        self.core.receiving.set(true);
    }

    /// One transmission of the buffered state per assigned span.
    async fn walk_tdma(&self, schedule: &TdmaSchedule, announcement: &Announcement) {
        let address = self.core.address;
        let mut last = 0;
        while let Some((start, end)) = schedule.next_relevant_timespan(address, last) {
            last = start;
            let at = self.core.slot_start(announcement.clock, start);
            if at < self.core.ctx.now() {
                warn!("{}: span {}..{} started at {:?}, skipped", self.core.module, start, end, at);
                self.skipped_spans.set(self.skipped_spans.get() + 1);
                continue;
            }
            self.core.ctx.timeout_until(at).await;
            let state = self.latest.borrow().clone();
            match state {
                Some(state) => self.core.transmit(FrameKind::SensorData, self.gateway.get(), Payload::Data(state)).await,
                None => debug!("{}: nothing buffered for span {}..{}", self.core.module, start, end),
            }
        }
    }

    /// Per slot: sense, then transmit with the assigned probability.
    async fn contend(&self, schedule: &CsmaSchedule, announcement: &Announcement) {
        let Some(probability) = schedule.probability(self.core.address) else {
            debug!("{}: not part of the CSMA schedule", self.core.module);
            return;
        };
        for slot in 1..=schedule.length() {
            self.core.ctx.timeout_until(self.core.slot_start(announcement.clock, slot)).await;
            if self.latest.borrow().is_none() {
                continue;
            }
            if self.core.sense().await {
                trace!("{}: medium busy in slot {}", self.core.module, slot);
                continue;
            }
            let draw: f64 = self.core.ctx.with_rng(|rng| rng.r#gen());
            if draw > probability {
                continue;
            }
            let state = self.latest.borrow().clone();
            if let Some(state) = state {
                self.core.transmit(FrameKind::SensorData, self.gateway.get(), Payload::Data(state)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacLayer;
    use crate::mac::test_support::{Bench, announcement};
    use crate::messages::Message;
    use crate::schedule::{FLAG_TRANSMIT, TdmaSchedule};
    use std::time::Duration;

    fn sensor(bench: &mut Bench, config: MacConfig) -> (SensorMac, crate::construction::Gate<StackMessage>) {
        let ctx = bench.ctx();
        let device = Device::new(&ctx, "sensor", 10.0, 0.0);
        let address = bench.allocator.allocate();
        let mac = SensorMac::new(&ctx, &device, address, config, bench.mcs()).unwrap();
        bench.attach(&device, mac.phy_gate());
        let (app, _) = bench.app("sensor", mac.network_gate());
        (mac, app)
    }

    fn send_state(app: &crate::construction::Gate<StackMessage>, value: f64) -> Message {
        let message = Message::new(StackCommand::SendState { state: Transmittable::measurement(vec![value]) });
        app.output.send(StackMessage::Command(message.clone()));
        message
    }

    #[test]
    fn tdma_sends_the_latest_state_in_every_span() {
        let mut bench = Bench::new();
        let (mac, app) = sensor(&mut bench, MacConfig::default());
        let gateway = bench.radio("gateway", 0.0);
        let gateway_address = MacAddress::from_index(99);
        let other = MacAddress::from_index(98);

        assert_eq!(send_state(&app, 1.0).processed().value(), Some(Reply::Done));
        send_state(&app, 2.0);
        let schedule = TdmaSchedule::from_pairs([
            (other, FLAG_TRANSMIT),
            (mac.address(), FLAG_TRANSMIT),
            (mac.address(), FLAG_TRANSMIT),
            (other, FLAG_TRANSMIT),
            (mac.address(), FLAG_TRANSMIT),
        ]);
        gateway.send(announcement(gateway_address, Schedule::Tdma(schedule), Duration::ZERO));
        bench.sim.run().unwrap();

        assert_eq!(mac.gateway(), Some(gateway_address));
        let data = gateway.frames(FrameKind::SensorData);
        assert_eq!(data.len(), 2);
        for (header, payload) in &data {
            assert_eq!(*payload, Payload::Data(Transmittable::measurement(vec![2.0])));
            assert_eq!(header.destination, Some(gateway_address));
        }
        let times: Vec<_> = mac.sent_frames().iter().map(|frame| frame.time).collect();
        assert_eq!(times, vec![Duration::from_millis(20), Duration::from_millis(50)]);
        assert!(mac.is_receiving());
        assert_eq!(mac.buffered_state(), Some(Transmittable::measurement(vec![2.0])));
    }

    #[test]
    fn spans_in_the_past_are_skipped() {
        let mut bench = Bench::new();
        let (mac, app) = sensor(&mut bench, MacConfig::default());
        let gateway = bench.radio("gateway", 0.0);
        send_state(&app, 1.0);
        bench.sim.run_until(Duration::from_millis(100)).unwrap();

        let schedule = TdmaSchedule::from_pairs([(mac.address(), FLAG_TRANSMIT)]);
        gateway.send(announcement(MacAddress::from_index(99), Schedule::Tdma(schedule), Duration::ZERO));
        bench.sim.run().unwrap();

        assert_eq!(mac.skipped_spans(), 1);
        assert!(gateway.frames(FrameKind::SensorData).is_empty());
        assert!(mac.buffered_state().is_some());
    }

    #[test]
    fn csma_with_certain_probability_sends_in_every_free_slot() {
        let mut bench = Bench::new();
        let config = MacConfig { protocol: crate::mac::MacProtocol::Csma, ..MacConfig::default() };
        let (mac, app) = sensor(&mut bench, config);
        let gateway = bench.radio("gateway", 0.0);
        send_state(&app, 4.0);

        let schedule = CsmaSchedule::new(vec![(mac.address(), 1.0)], 5).unwrap();
        gateway.send(announcement(MacAddress::from_index(99), Schedule::Csma(schedule), Duration::ZERO));
        bench.sim.run().unwrap();

        let data = gateway.frames(FrameKind::SensorData);
        assert_eq!(data.len(), 5);
        // CSMA frames carry the source address.
        assert!(data.iter().all(|(header, _)| header.source == mac.address()));
        let times: Vec<_> = mac.sent_frames().iter().map(|frame| frame.time).collect();
        assert_eq!(times, (1..=5).map(|slot| Duration::from_millis(10 * slot)).collect::<Vec<_>>());
    }

    #[test]
    fn csma_without_assignment_stays_silent() {
        let mut bench = Bench::new();
        let (mac, app) = sensor(&mut bench, MacConfig::default());
        let gateway = bench.radio("gateway", 0.0);
        send_state(&app, 4.0);
        let schedule = CsmaSchedule::new(vec![(MacAddress::from_index(50), 1.0)], 3).unwrap();
        gateway.send(announcement(MacAddress::from_index(99), Schedule::Csma(schedule), Duration::ZERO));
        bench.sim.run().unwrap();
        assert!(mac.sent_frames().is_empty());
    }

    #[test]
    fn raw_headers_are_a_wiring_error() {
        let mut bench = Bench::new();
        let _sensor = sensor(&mut bench, MacConfig::default());
        let gateway = bench.radio("gateway", 0.0);
        gateway.send(crate::messages::Packet::new(
            crate::messages::Header::Raw(Transmittable::text("?")),
            Payload::Data(Transmittable::sized(4)),
        ));
        let err = bench.sim.run().unwrap_err();
        assert!(matches!(err, crate::error::SimError::UnexpectedHeader { .. }));
    }
}
