//! Path loss between pairs of devices.
//!
//! An [`AttenuationModel`] tracks the attenuation between two devices and
//! republishes it whenever either of them moves. Its value is the sum of the
//! configured [`PathLoss`] components, so free-space loss and an extra
//! log-distance term can be joined into one model.

use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::frequency_band::FrequencyBandSpec;
use super::signal_calculations::{PathLossParameters, free_space_path_loss, log_distance_path_loss};
use crate::devices::{Device, DeviceId};
use crate::error::{SimError, SimResult};
use crate::simulation::{CallbackId, Notifier, SimContext};

/// Device pairs further apart than this (in meters) are not recomputed on movement.
pub const STANDBY_THRESHOLD: f64 = 3_000_000.0;

/// One additive path loss term.
pub trait PathLoss {
    fn name(&self) -> &'static str;

    /// Attenuation in dB between `a` and `b` at their current positions.
    fn attenuation_db(&self, band: &FrequencyBandSpec, a: &Device, b: &Device) -> f64;
}

/// Free-space path loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsplAttenuation;

impl PathLoss for FsplAttenuation {
    fn name(&self) -> &'static str {
        "fspl"
    }

    fn attenuation_db(&self, band: &FrequencyBandSpec, a: &Device, b: &Device) -> f64 {
        let distance = a.distance_to(b);
        match free_space_path_loss(distance, band.frequency) {
            Some(loss) => loss,
            None => {
                warn!("{} and {} share a position, assuming no path loss", a.name(), b.name());
                0.0
            }
        }
    }
}

/// Log-distance path loss with optional log-normal shadowing.
///
/// Shadowing is drawn from a generator owned by the component, so a run with the
/// same seed reproduces the same attenuation sequence.
pub struct LogDistanceAttenuation {
    params: PathLossParameters,
    rng: RefCell<StdRng>,
}

impl LogDistanceAttenuation {
    pub fn new(params: PathLossParameters, seed: u64) -> Self {
        Self {
            params,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl PathLoss for LogDistanceAttenuation {
    fn name(&self) -> &'static str {
        "log-distance"
    }

    fn attenuation_db(&self, _band: &FrequencyBandSpec, a: &Device, b: &Device) -> f64 {
        log_distance_path_loss(a.distance_to(b), &self.params, &mut *self.rng.borrow_mut())
    }
}

/// Scene-level choice of a path loss component.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttenuationConfig {
    Fspl,
    LogDistance(PathLossParameters),
}

impl AttenuationConfig {
    fn build(&self, seed: u64) -> Box<dyn PathLoss> {
        match self {
            AttenuationConfig::Fspl => Box::new(FsplAttenuation),
            AttenuationConfig::LogDistance(params) => Box::new(LogDistanceAttenuation::new(params.clone(), seed)),
        }
    }
}

/// Current attenuation between two devices.
#[derive(Clone)]
pub struct AttenuationModel {
    inner: Rc<ModelInner>,
}

struct ModelInner {
    a: Device,
    b: Device,
    band: FrequencyBandSpec,
    components: Vec<Box<dyn PathLoss>>,
    attenuation: Cell<f64>,
    changes: Notifier<f64>,
    subscriptions: RefCell<Vec<CallbackId>>,
}

impl AttenuationModel {
    pub fn new(
        ctx: &SimContext,
        band: FrequencyBandSpec,
        a: &Device,
        b: &Device,
        components: Vec<Box<dyn PathLoss>>,
    ) -> SimResult<Self> {
        if a == b {
            return Err(SimError::SameDevice { device: a.name().to_string() });
        }
        let inner = Rc::new(ModelInner {
            a: a.clone(),
            b: b.clone(),
            band,
            components,
            attenuation: Cell::new(0.0),
            changes: Notifier::new(ctx, format!("Attenuation({}, {}).changes", a.name(), b.name())),
            subscriptions: RefCell::new(Vec::new()),
        });
        inner.attenuation.set(inner.compute());

        for device in [a, b] {
            let weak: Weak<ModelInner> = Rc::downgrade(&inner);
            let id = device.position().changes().subscribe_callback(0, move |_| {
                if let Some(model) = weak.upgrade() {
                    model.position_changed();
                }
            });
            inner.subscriptions.borrow_mut().push(id);
        }
        debug!("{} <-> {}: initial attenuation {:.2} dB", a.name(), b.name(), inner.attenuation.get());
        Ok(Self { inner })
    }

    /// Attenuation in dB.
    pub fn attenuation(&self) -> f64 {
        self.inner.attenuation.get()
    }

    /// Triggered with the new attenuation whenever it changes.
    pub fn changes(&self) -> &Notifier<f64> {
        &self.inner.changes
    }

    pub fn devices(&self) -> (&Device, &Device) {
        (&self.inner.a, &self.inner.b)
    }

    /// Names of the joined components.
    pub fn components(&self) -> Vec<&'static str> {
        self.inner.components.iter().map(|c| c.name()).collect()
    }
}

impl ModelInner {
    fn compute(&self) -> f64 {
        self.components.iter().map(|c| c.attenuation_db(&self.band, &self.a, &self.b)).sum()
    }

    fn position_changed(&self) {
        if self.a.distance_to(&self.b) >= STANDBY_THRESHOLD {
            debug!("{} <-> {}: out of range, attenuation not updated", self.a.name(), self.b.name());
            return;
        }
        let attenuation = self.compute();
        if attenuation != self.attenuation.get() {
            self.attenuation.set(attenuation);
            self.changes.trigger(attenuation);
        }
    }
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        let subscriptions = self.subscriptions.take();
        for (device, id) in [&self.a, &self.b].into_iter().zip(subscriptions) {
            device.position().changes().unsubscribe_callback(id);
        }
    }
}

impl fmt::Debug for AttenuationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttenuationModel")
            .field("a", &self.inner.a.name())
            .field("b", &self.inner.b.name())
            .field("attenuation", &self.inner.attenuation.get())
            .finish()
    }
}

/// Creates one model per unordered device pair and hands out the cached one afterwards.
pub struct AttenuationModelFactory {
    ctx: SimContext,
    band: FrequencyBandSpec,
    configs: Vec<AttenuationConfig>,
    models: RefCell<BTreeMap<(DeviceId, DeviceId), AttenuationModel>>,
}

impl AttenuationModelFactory {
    pub fn new(ctx: &SimContext, band: FrequencyBandSpec, configs: Vec<AttenuationConfig>) -> Self {
        Self {
            ctx: ctx.clone(),
            band,
            configs,
            models: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn configs(&self) -> &[AttenuationConfig] {
        &self.configs
    }

    pub fn get(&self, a: &Device, b: &Device) -> SimResult<AttenuationModel> {
        let key = if a.id() <= b.id() { (a.id(), b.id()) } else { (b.id(), a.id()) };
        if let Some(model) = self.models.borrow().get(&key) {
            return Ok(model.clone());
        }
        // Per-pair seed so adding a device does not reshuffle the others' shadowing.
        let seed = self.ctx.seed() ^ ((u64::from(key.0.0) << 32) | u64::from(key.1.0));
        let components = self.configs.iter().map(|c| c.build(seed)).collect();
        let model = AttenuationModel::new(&self.ctx, self.band, a, b, components)?;
        self.models.borrow_mut().insert(key, model.clone());
        Ok(model)
    }
}

impl fmt::Debug for AttenuationModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttenuationModelFactory")
            .field("configs", &self.configs)
            .field("models", &self.models.borrow().len())
            .finish()
    }
}
