//! A simple half-duplex physical layer.
//!
//! The PHY listens to every transmission on its band and keeps track of the power
//! each one contributes at its device. It decodes one transmission at a time:
//! while decoding, every other transmission is interference. Bit errors are
//! accumulated over time from the bit error rate of the current
//! signal-to-interference-and-noise ratio; a header or payload is received if the
//! share of erroneous bits stays within what the MCS can correct.

use log::{debug, info, trace};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::attenuation::AttenuationModel;
use super::frequency_band::FrequencyBand;
use super::mcs::Mcs;
use super::signal_calculations::{DEFAULT_TEMPERATURE_CELSIUS, dbm_to_mw, mw_to_dbm, thermal_noise_mw};
use super::transmission::{Transmission, TransmissionId};
use crate::construction::{Gate, GateListener, Module, StackLayer};
use crate::devices::Device;
use crate::error::{SimError, SimResult};
use crate::messages::{Message, Reply, StackCommand, StackMessage};
use crate::simulation::{CallbackId, Notifier, ProcessMode, SimContext};

/// Granularity at which transmissions may start.
pub const TIME_SLOT_LENGTH: Duration = Duration::from_micros(1);

/// Name of the gate facing the MAC layer.
pub const MAC_GATE: &str = "mac";

/// Counters kept by a PHY.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhyStats {
    pub transmitted: usize,
    pub received: usize,
    pub header_failures: usize,
    pub payload_failures: usize,
}

struct Contribution {
    power_mw: f64,
    model: AttenuationModel,
    subscription: CallbackId,
}

#[derive(Default)]
struct PhyState {
    transmitting: bool,
    receiving: bool,
    contributions: BTreeMap<TransmissionId, Contribution>,
}

/// Bit errors of the part of a transmission currently being decoded.
struct BitErrorTracker {
    mcs: Rc<dyn Mcs>,
    bit_error_rate: f64,
    errors: f64,
    since: Duration,
}

impl BitErrorTracker {
    fn new(mcs: Rc<dyn Mcs>, bit_error_rate: f64, now: Duration) -> Self {
        Self { mcs, bit_error_rate, errors: 0.0, since: now }
    }

    /// Count the errors made at the current rate up to `now`.
    fn advance(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.since).as_secs_f64();
        self.errors += self.bit_error_rate * elapsed * self.mcs.bit_rate();
        self.since = now;
    }

    fn decodable(&self, bits: usize) -> bool {
        if bits == 0 {
            return true;
        }
        self.errors.round() / bits as f64 <= self.mcs.max_correctable_ber()
    }

    fn restart(&mut self, mcs: Rc<dyn Mcs>, bit_error_rate: f64, now: Duration) {
        *self = Self::new(mcs, bit_error_rate, now);
    }
}

enum Outcome {
    Received,
    HeaderFailed,
    PayloadFailed,
}

/// Physical layer attached to one device and one band.
#[derive(Clone)]
pub struct SimplePhy {
    inner: Rc<PhyInner>,
}

struct PhyInner {
    ctx: SimContext,
    module: Module<StackMessage>,
    gate: Gate<StackMessage>,
    device: Device,
    band: FrequencyBand,
    noise_mw: f64,
    state: RefCell<PhyState>,
    power_changes: Notifier<()>,
    receiving_finished: Notifier<()>,
    send_requests: Notifier<Message>,
    stats: RefCell<PhyStats>,
}

impl SimplePhy {
    pub fn new(ctx: &SimContext, device: &Device, band: &FrequencyBand) -> SimResult<Self> {
        let module = Module::with_owner(ctx, device.name(), "Phy");
        let gate = module.add_gate(MAC_GATE)?;
        let noise_mw = thermal_noise_mw(band.spec().bandwidth, DEFAULT_TEMPERATURE_CELSIUS);
        let path = module.path().to_string();
        let inner = Rc::new(PhyInner {
            ctx: ctx.clone(),
            module,
            gate,
            device: device.clone(),
            band: band.clone(),
            noise_mw,
            state: RefCell::new(PhyState::default()),
            power_changes: Notifier::new(ctx, format!("{}.power_changes", path)),
            receiving_finished: Notifier::new(ctx, format!("{}.receiving_finished", path)),
            send_requests: Notifier::new(ctx, format!("{}.send_requests", path)),
            stats: RefCell::new(PhyStats::default()),
        });

        let weak = Rc::downgrade(&inner);
        band.new_transmission().subscribe_callback(0, move |t: &Rc<Transmission>| {
            if let Some(phy) = weak.upgrade() {
                phy.track(t);
            }
        });

        let weak = Rc::downgrade(&inner);
        band.new_transmission().subscribe_process(ProcessMode::Blocking, move |t: Rc<Transmission>| {
            let phy = weak.upgrade();
            async move {
                if let Some(phy) = phy {
                    phy.receive(t).await;
                }
            }
        });

        let weak = Rc::downgrade(&inner);
        inner.send_requests.subscribe_process(ProcessMode::Queued, move |message: Message| {
            let phy = weak.upgrade();
            async move {
                if let Some(phy) = phy {
                    phy.send(message).await;
                }
            }
        });

        let weak: Weak<PhyInner> = Rc::downgrade(&inner);
        GateListener::new(MAC_GATE, "mac_gate_listener")
            .accepting(&[StackMessage::MESSAGE])
            .bind_callback(&inner.module, move |message: StackMessage| match weak.upgrade() {
                Some(phy) => phy.handle_mac_message(message),
                None => Ok(()),
            })?;

        debug!("{}: noise floor {:.2} dBm", path, mw_to_dbm(noise_mw));
        Ok(Self { inner })
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn gate(&self) -> &Gate<StackMessage> {
        &self.inner.gate
    }

    pub fn band(&self) -> &FrequencyBand {
        &self.inner.band
    }

    pub fn is_transmitting(&self) -> bool {
        self.inner.state.borrow().transmitting
    }

    pub fn is_receiving(&self) -> bool {
        self.inner.state.borrow().receiving
    }

    /// Thermal noise plus every foreign transmission, in dBm.
    pub fn received_power_dbm(&self) -> f64 {
        mw_to_dbm(self.inner.total_power_mw())
    }

    pub fn stats(&self) -> PhyStats {
        self.inner.stats.borrow().clone()
    }
}

impl StackLayer<StackMessage> for SimplePhy {
    fn module(&self) -> &Module<StackMessage> {
        &self.inner.module
    }
}

impl PhyInner {
    fn total_power_mw(&self) -> f64 {
        self.noise_mw + self.state.borrow().contributions.values().map(|c| c.power_mw).sum::<f64>()
    }

    /// Current bit error rate of transmission `id`, or `None` once it is off the air.
    fn bit_error_rate(&self, id: TransmissionId, mcs: &dyn Mcs) -> Option<f64> {
        let signal = self.state.borrow().contributions.get(&id)?.power_mw;
        let noise_and_interference = self.total_power_mw() - signal;
        Some(mcs.calculate_bit_error_rate(mw_to_dbm(signal), mw_to_dbm(noise_and_interference)))
    }

    fn is_own(&self, t: &Transmission) -> bool {
        t.sender().id() == self.device.id()
    }

    /// Start accounting for the power of a new foreign transmission.
    fn track(self: &Rc<Self>, t: &Rc<Transmission>) {
        if self.is_own(t) {
            return;
        }
        let model = match self.band.attenuation_model(&self.device, t.sender()) {
            Ok(model) => model,
            Err(err) => {
                self.ctx.fail(err);
                return;
            }
        };
        let id = t.id();
        let power_dbm = t.power_dbm();
        let weak = Rc::downgrade(self);
        let subscription = model.changes().subscribe_callback(0, move |attenuation: &f64| {
            if let Some(phy) = weak.upgrade() {
                phy.update_contribution(id, dbm_to_mw(power_dbm - attenuation));
            }
        });
        let power_mw = dbm_to_mw(power_dbm - model.attenuation());
        trace!("{}: {} arrives at {:.2} dBm", self.module, t, mw_to_dbm(power_mw));
        self.state
            .borrow_mut()
            .contributions
            .insert(id, Contribution { power_mw, model, subscription });

        let weak = Rc::downgrade(self);
        t.completes().on_trigger(move |_| {
            if let Some(phy) = weak.upgrade() {
                phy.drop_contribution(id);
            }
        });
        self.power_changes.trigger(());
    }

    fn update_contribution(&self, id: TransmissionId, power_mw: f64) {
        if let Some(contribution) = self.state.borrow_mut().contributions.get_mut(&id) {
            contribution.power_mw = power_mw;
        }
        self.power_changes.trigger(());
    }

    fn drop_contribution(&self, id: TransmissionId) {
        let removed = self.state.borrow_mut().contributions.remove(&id);
        if let Some(contribution) = removed {
            contribution.model.changes().unsubscribe_callback(contribution.subscription);
            self.power_changes.trigger(());
        }
    }

    async fn receive(self: Rc<Self>, t: Rc<Transmission>) {
        if self.is_own(&t) {
            return;
        }
        if self.state.borrow().transmitting {
            debug!("{}: busy transmitting, not receiving {}", self.module, t);
            return;
        }
        let Some(initial) = self.bit_error_rate(t.id(), t.header_mcs().as_ref()) else {
            return;
        };
        self.state.borrow_mut().receiving = true;

        let tracker = Rc::new(RefCell::new(BitErrorTracker::new(t.header_mcs().clone(), initial, self.ctx.now())));
        let weak = Rc::downgrade(&self);
        let tracked = tracker.clone();
        let id = t.id();
        let subscription = self.power_changes.subscribe_callback(1, move |_| {
            if let Some(phy) = weak.upgrade() {
                let mut tracker = tracked.borrow_mut();
                tracker.advance(phy.ctx.now());
                if let Some(ber) = phy.bit_error_rate(id, tracker.mcs.as_ref()) {
                    tracker.bit_error_rate = ber;
                }
            }
        });

        t.header_completes().wait().await;
        let header_ok = {
            let mut tracker = tracker.borrow_mut();
            tracker.advance(self.ctx.now());
            tracker.decodable(t.header_bits())
        };

        let outcome = if header_ok {
            let payload_mcs = t.payload_mcs().clone();
            let ber = self.bit_error_rate(id, payload_mcs.as_ref()).unwrap_or(tracker.borrow().bit_error_rate);
            tracker.borrow_mut().restart(payload_mcs, ber, self.ctx.now());
            t.completes().wait().await;
            let mut tracker = tracker.borrow_mut();
            tracker.advance(self.ctx.now());
            if tracker.decodable(t.payload_bits()) { Outcome::Received } else { Outcome::PayloadFailed }
        } else {
            Outcome::HeaderFailed
        };

        self.power_changes.unsubscribe_callback(subscription);
        self.state.borrow_mut().receiving = false;
        match outcome {
            Outcome::Received => {
                self.stats.borrow_mut().received += 1;
                debug!("{}: received {}", self.module, t.packet());
                self.gate.output.send(StackMessage::Packet(t.packet().clone()));
            }
            Outcome::HeaderFailed => {
                self.stats.borrow_mut().header_failures += 1;
                info!("{}: header of {} not decodable, dropped", self.module, t);
            }
            Outcome::PayloadFailed => {
                self.stats.borrow_mut().payload_failures += 1;
                info!("{}: payload of {} not decodable, dropped", self.module, t);
            }
        }
        self.receiving_finished.trigger(());
    }

    async fn send(self: Rc<Self>, message: Message) {
        let StackCommand::Send { packet, power_dbm, header_mcs, payload_mcs } = message.command.clone() else {
            return;
        };
        while self.state.borrow().receiving {
            trace!("{}: waiting for the current reception to finish", self.module);
            self.receiving_finished.wait().await;
        }
        self.state.borrow_mut().transmitting = true;
        self.ctx.next_time_slot(TIME_SLOT_LENGTH).await;

        match self.band.transmit(&self.device, power_dbm, header_mcs, payload_mcs, packet) {
            Ok(t) => {
                t.completes().wait().await;
                self.stats.borrow_mut().transmitted += 1;
            }
            Err(err) => self.ctx.fail(err),
        }
        self.state.borrow_mut().transmitting = false;
        message.set_processed(Reply::Done);
    }

    fn handle_mac_message(&self, message: StackMessage) -> SimResult<()> {
        let StackMessage::Command(message) = message else {
            return Err(SimError::UnexpectedMessage { layer: self.module.path().to_string(), got: "packet".into() });
        };
        match &message.command {
            StackCommand::Send { .. } => {
                self.send_requests.trigger(message);
                Ok(())
            }
            StackCommand::Sense => {
                // Any foreign transmission on the band counts, however weak.
                let busy = {
                    let state = self.state.borrow();
                    state.transmitting || !state.contributions.is_empty()
                };
                message.set_processed(Reply::ChannelBusy(busy));
                Ok(())
            }
            other => Err(SimError::UnexpectedMessage {
                layer: self.module.path().to_string(),
                got: other.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, Packet, Payload, Transmittable};
    use crate::physical::{BpskMcs, FrequencyBandSpec};
    use crate::simulation::Simulation;
    use std::cell::Cell;

    struct Station {
        phy: SimplePhy,
        mac: Gate<StackMessage>,
        received: Rc<RefCell<Vec<Packet>>>,
    }

    fn station(sim: &Simulation, band: &FrequencyBand, name: &str, x: f64) -> Station {
        let ctx = sim.context();
        let device = Device::new(&ctx, name, x, 0.0);
        let phy = SimplePhy::new(&ctx, &device, band).unwrap();
        let mac = Gate::new(&ctx, name, "phy");
        mac.bi_connect_with(phy.gate());
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        mac.input.subscribe(move |m: &StackMessage| {
            if let StackMessage::Packet(p) = m {
                sink.borrow_mut().push(p.clone());
            }
        });
        Station { phy, mac, received }
    }

    fn send_command(band: &FrequencyBand, bytes: usize) -> Message {
        let mcs: Rc<dyn Mcs> = Rc::new(BpskMcs::new(band.spec()));
        let packet = Packet::new(Header::Raw(Transmittable::text("hdr")), Payload::Data(Transmittable::sized(bytes)));
        Message::new(StackCommand::Send { packet, power_dbm: 0.0, header_mcs: mcs.clone(), payload_mcs: mcs })
    }

    #[test]
    fn nearby_packet_is_received_once() {
        let mut sim = Simulation::new();
        let band = FrequencyBand::new(&sim.context(), FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", 0.0);
        let b = station(&sim, &band, "b", 10.0);

        let message = send_command(&band, 100);
        a.mac.output.send(StackMessage::Command(message.clone()));
        sim.run().unwrap();

        assert_eq!(message.processed().value(), Some(Reply::Done));
        assert_eq!(b.received.borrow().len(), 1);
        assert!(a.received.borrow().is_empty());
        assert_eq!(a.phy.stats().transmitted, 1);
        assert_eq!(b.phy.stats().received, 1);
        // Transmissions start on the first slot boundary.
        assert_eq!(band.transmissions_between(Duration::ZERO, sim.now())[0].start_time(), TIME_SLOT_LENGTH);
    }

    #[test]
    fn distant_packet_is_lost() {
        let mut sim = Simulation::new();
        let band = FrequencyBand::new(&sim.context(), FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", 0.0);
        let b = station(&sim, &band, "b", 100_000.0);
        a.mac.output.send(StackMessage::Command(send_command(&band, 100)));
        sim.run().unwrap();
        assert!(b.received.borrow().is_empty());
        assert_eq!(b.phy.stats().header_failures, 1);
    }

    #[test]
    fn simultaneous_equal_power_transmissions_collide() {
        let mut sim = Simulation::new();
        let band = FrequencyBand::new(&sim.context(), FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", -10.0);
        let b = station(&sim, &band, "b", 10.0);
        let c = station(&sim, &band, "c", 0.0);
        a.mac.output.send(StackMessage::Command(send_command(&band, 100)));
        b.mac.output.send(StackMessage::Command(send_command(&band, 100)));
        sim.run().unwrap();
        assert!(c.received.borrow().is_empty());
        assert_eq!(c.phy.stats().header_failures, 1);
    }

    #[test]
    fn sensing_reports_foreign_transmissions() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", 0.0);
        let b = station(&sim, &band, "b", 10.0);

        let idle = Message::new(StackCommand::Sense);
        b.mac.output.send(StackMessage::Command(idle.clone()));
        assert_eq!(idle.processed().value(), Some(Reply::ChannelBusy(false)));

        a.mac.output.send(StackMessage::Command(send_command(&band, 1000)));
        let busy = Message::new(StackCommand::Sense);
        let probe = busy.clone();
        let mac = b.mac.clone();
        let probe_ctx = ctx.clone();
        ctx.spawn(async move {
            probe_ctx.timeout(Duration::from_micros(100)).await;
            mac.output.send(StackMessage::Command(probe));
        });
        sim.run().unwrap();
        assert_eq!(busy.processed().value(), Some(Reply::ChannelBusy(true)));
        assert!(!b.phy.is_receiving());
    }

    #[test]
    fn sender_moving_away_mid_payload_corrupts_only_the_payload() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", 0.0);
        let b = station(&sim, &band, "b", 10.0);

        // 8000 payload bits take about 485 µs; the header is done after about 2.5 µs.
        a.mac.output.send(StackMessage::Command(send_command(&band, 1000)));
        let sender = a.phy.device().clone();
        let mover_ctx = ctx.clone();
        ctx.spawn(async move {
            mover_ctx.timeout(Duration::from_micros(100)).await;
            sender.position().set(100_000.0, 0.0);
        });
        sim.run_until(Duration::from_micros(50)).unwrap();
        assert!(b.phy.is_receiving());
        sim.run().unwrap();

        assert!(b.received.borrow().is_empty());
        let stats = b.phy.stats();
        assert_eq!(stats.header_failures, 0);
        assert_eq!(stats.payload_failures, 1);
        assert!(!b.phy.is_receiving());
    }

    #[test]
    fn sensing_reports_transmissions_below_the_noise_floor() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let far = station(&sim, &band, "far", 100_000.0);
        let b = station(&sim, &band, "b", 0.0);

        far.mac.output.send(StackMessage::Command(send_command(&band, 1000)));
        sim.run_until(Duration::from_micros(100)).unwrap();
        assert!(b.phy.received_power_dbm() - mw_to_dbm(b.phy.inner.noise_mw) < 0.01);
        let sense = Message::new(StackCommand::Sense);
        b.mac.output.send(StackMessage::Command(sense.clone()));
        assert_eq!(sense.processed().value(), Some(Reply::ChannelBusy(true)));

        sim.run().unwrap();
        let idle = Message::new(StackCommand::Sense);
        b.mac.output.send(StackMessage::Command(idle.clone()));
        assert_eq!(idle.processed().value(), Some(Reply::ChannelBusy(false)));
    }

    #[test]
    fn sending_waits_for_the_running_reception() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", 0.0);
        let b = station(&sim, &band, "b", 10.0);

        a.mac.output.send(StackMessage::Command(send_command(&band, 1000)));
        let reply = send_command(&band, 10);
        let pending = reply.clone();
        let mac = b.mac.clone();
        let sender_ctx = ctx.clone();
        let sent_while_receiving = Rc::new(Cell::new(false));
        let flag = sent_while_receiving.clone();
        let phy = b.phy.clone();
        ctx.spawn(async move {
            sender_ctx.timeout(Duration::from_micros(50)).await;
            flag.set(phy.is_receiving());
            mac.output.send(StackMessage::Command(pending));
        });
        sim.run().unwrap();

        assert!(sent_while_receiving.get());
        assert_eq!(reply.processed().value(), Some(Reply::Done));
        let all = band.transmissions_between(Duration::ZERO, sim.now());
        assert_eq!(all.len(), 2);
        assert!(all[1].start_time() >= all[0].stop_time());
        assert_eq!(b.received.borrow().len(), 1);
        assert_eq!(a.received.borrow().len(), 1);
    }

    #[test]
    fn unknown_commands_abort_the_run() {
        let mut sim = Simulation::new();
        let band = FrequencyBand::new(&sim.context(), FrequencyBandSpec::default());
        let a = station(&sim, &band, "a", 0.0);
        a.mac
            .output
            .send(StackMessage::Command(Message::new(StackCommand::SendState { state: Transmittable::sized(1) })));
        let err = sim.run().unwrap_err();
        assert!(matches!(err, SimError::UnexpectedMessage { .. }));
    }

    #[test]
    fn error_budget_follows_the_code_rate() {
        let mcs: Rc<dyn Mcs> = Rc::new(BpskMcs::new(FrequencyBandSpec::default()));
        let mut tracker = BitErrorTracker::new(mcs, 0.2, Duration::ZERO);
        // 22 Mbit/s on the air for 10 µs at 20 % errors: 44 errors.
        tracker.advance(Duration::from_micros(10));
        assert!((tracker.errors - 44.0).abs() < 1e-6);
        assert!(tracker.decodable(220));
        // 3/4 coding corrects a quarter of the bits at most.
        assert!(!tracker.decodable(165));
        tracker.bit_error_rate = 0.5;
        tracker.advance(Duration::from_micros(20));
        assert!((tracker.errors - 154.0).abs() < 1e-6);
        assert!(!tracker.decodable(440));
    }
}
