//! The shared radio medium.

use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::attenuation::{AttenuationConfig, AttenuationModel, AttenuationModelFactory};
use super::mcs::Mcs;
use super::transmission::{Transmission, TransmissionId};
use crate::devices::Device;
use crate::error::SimResult;
use crate::messages::Packet;
use crate::simulation::{Notifier, SimContext};

/// Carrier frequency and bandwidth of a band, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FrequencyBandSpec {
    pub frequency: f64,
    pub bandwidth: f64,
}

impl Default for FrequencyBandSpec {
    fn default() -> Self {
        Self {
            frequency: 2.4e9,
            bandwidth: 22e6,
        }
    }
}

/// The medium every PHY of a simulation transmits on.
///
/// Keeps every transmission ever made, the set of those currently on the air,
/// and the attenuation models between devices. New transmissions are announced
/// synchronously through [`FrequencyBand::new_transmission`].
#[derive(Clone)]
pub struct FrequencyBand {
    inner: Rc<BandInner>,
}

struct BandInner {
    ctx: SimContext,
    spec: FrequencyBandSpec,
    attenuation: AttenuationModelFactory,
    history: RefCell<Vec<Rc<Transmission>>>,
    active: RefCell<Vec<Rc<Transmission>>>,
    new_transmission: Notifier<Rc<Transmission>>,
    next_id: Cell<u64>,
}

impl FrequencyBand {
    /// Band with free-space path loss only.
    pub fn new(ctx: &SimContext, spec: FrequencyBandSpec) -> Self {
        Self::with_attenuation(ctx, spec, vec![AttenuationConfig::Fspl])
    }

    pub fn with_attenuation(ctx: &SimContext, spec: FrequencyBandSpec, attenuation: Vec<AttenuationConfig>) -> Self {
        Self {
            inner: Rc::new(BandInner {
                ctx: ctx.clone(),
                spec,
                attenuation: AttenuationModelFactory::new(ctx, spec, attenuation),
                history: RefCell::new(Vec::new()),
                active: RefCell::new(Vec::new()),
                new_transmission: Notifier::new(ctx, "FrequencyBand.new_transmission"),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn spec(&self) -> FrequencyBandSpec {
        self.inner.spec
    }

    /// Triggered with every transmission right after it starts.
    pub fn new_transmission(&self) -> &Notifier<Rc<Transmission>> {
        &self.inner.new_transmission
    }

    /// Put `packet` on the air starting now.
    ///
    /// The returned transmission's `header_completes` and `completes` events are
    /// resolved when virtual time reaches the end of the header and of the
    /// whole packet. It leaves the active set just before `completes` resolves.
    pub fn transmit(
        &self,
        sender: &Device,
        power_dbm: f64,
        header_mcs: Rc<dyn Mcs>,
        payload_mcs: Rc<dyn Mcs>,
        packet: Packet,
    ) -> SimResult<Rc<Transmission>> {
        let ctx = &self.inner.ctx;
        let id = TransmissionId(self.inner.next_id.get());
        let transmission = Rc::new(Transmission::new(
            id,
            sender.clone(),
            power_dbm,
            header_mcs,
            payload_mcs,
            packet,
            ctx.now(),
        )?);
        self.inner.next_id.set(id.0 + 1);
        self.inner.history.borrow_mut().push(transmission.clone());
        self.inner.active.borrow_mut().push(transmission.clone());
        debug!("{} started", transmission);

        let band: Weak<BandInner> = Rc::downgrade(&self.inner);
        let timer_ctx = ctx.clone();
        let t = transmission.clone();
        ctx.spawn(async move {
            timer_ctx.timeout_until(t.header_stop_time()).await;
            t.header_completes().succeed(());
            timer_ctx.timeout_until(t.stop_time()).await;
            if let Some(band) = band.upgrade() {
                band.active.borrow_mut().retain(|a| a.id() != t.id());
            }
            debug!("{} completed", t);
            t.completes().succeed(());
        });

        self.inner.new_transmission.trigger(transmission.clone());
        Ok(transmission)
    }

    /// Transmissions currently on the air.
    pub fn active_transmissions(&self) -> Vec<Rc<Transmission>> {
        self.inner.active.borrow().clone()
    }

    /// Transmissions that were on the air at some point during `[from, to]`.
    pub fn transmissions_between(&self, from: Duration, to: Duration) -> Vec<Rc<Transmission>> {
        self.inner.history.borrow().iter().filter(|t| t.overlaps(from, to)).cloned().collect()
    }

    /// Active transmissions whose sender is at most `radius` meters from `receiver`.
    pub fn active_transmissions_in_reach(&self, receiver: &Device, radius: f64) -> Vec<Rc<Transmission>> {
        self.inner
            .active
            .borrow()
            .iter()
            .filter(|t| t.sender().distance_to(receiver) <= radius)
            .cloned()
            .collect()
    }

    /// Cached attenuation model between two devices.
    pub fn attenuation_model(&self, a: &Device, b: &Device) -> SimResult<AttenuationModel> {
        self.inner.attenuation.get(a, b)
    }
}

impl fmt::Debug for FrequencyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyBand")
            .field("spec", &self.inner.spec)
            .field("active", &self.inner.active.borrow().len())
            .field("total", &self.inner.history.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, Payload, Transmittable};
    use crate::physical::BpskMcs;
    use crate::simulation::Simulation;

    fn raw_packet(header: usize, payload: usize) -> Packet {
        Packet::new(Header::Raw(Transmittable::sized(header)), Payload::Data(Transmittable::sized(payload)))
    }

    #[test]
    fn transmissions_leave_the_active_set_when_done() {
        let mut sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let mcs: Rc<dyn Mcs> = Rc::new(BpskMcs::new(band.spec()));
        let sender = Device::new(&ctx, "tx", 0.0, 0.0);

        let announced = Rc::new(Cell::new(0));
        let announced2 = announced.clone();
        band.new_transmission().subscribe_callback(0, move |_| announced2.set(announced2.get() + 1));

        let t = band.transmit(&sender, 0.0, mcs.clone(), mcs, raw_packet(10, 100)).unwrap();
        assert_eq!(announced.get(), 1);
        assert_eq!(band.active_transmissions().len(), 1);

        sim.run_until(t.header_stop_time()).unwrap();
        assert!(t.header_completes().is_triggered());
        assert!(!t.is_completed());

        sim.run().unwrap();
        assert!(t.is_completed());
        assert_eq!(sim.now(), t.stop_time());
        assert!(band.active_transmissions().is_empty());
        assert_eq!(band.transmissions_between(Duration::ZERO, sim.now()).len(), 1);
        assert!(band.transmissions_between(sim.now() + Duration::from_nanos(1), sim.now() * 2).is_empty());
    }

    #[test]
    fn reach_filters_by_sender_distance() {
        let sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let mcs: Rc<dyn Mcs> = Rc::new(BpskMcs::new(band.spec()));
        let near = Device::new(&ctx, "near", 10.0, 0.0);
        let far = Device::new(&ctx, "far", 500.0, 0.0);
        let receiver = Device::new(&ctx, "rx", 0.0, 0.0);
        band.transmit(&near, 0.0, mcs.clone(), mcs.clone(), raw_packet(1, 1)).unwrap();
        band.transmit(&far, 0.0, mcs.clone(), mcs, raw_packet(1, 1)).unwrap();

        let in_reach = band.active_transmissions_in_reach(&receiver, 100.0);
        assert_eq!(in_reach.len(), 1);
        assert_eq!(in_reach[0].sender().name(), "near");
    }

    #[test]
    fn empty_transmissions_fail_without_side_effects() {
        let sim = Simulation::new();
        let ctx = sim.context();
        let band = FrequencyBand::new(&ctx, FrequencyBandSpec::default());
        let mcs: Rc<dyn Mcs> = Rc::new(BpskMcs::new(band.spec()));
        let sender = Device::new(&ctx, "tx", 0.0, 0.0);
        assert!(band.transmit(&sender, 0.0, mcs.clone(), mcs, raw_packet(0, 0)).is_err());
        assert!(band.active_transmissions().is_empty());
    }
}
