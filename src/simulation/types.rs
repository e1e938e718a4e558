//! Scene description of a networked control system.
//!
//! A scene is a JSON document listing the devices (one gateway plus sensors and
//! actuators), the frequency band, the path loss components and the MAC settings.
//! Everything but the device list has a default.

use serde::Deserialize;
use std::collections::HashSet;

use crate::error::{SimError, SimResult};
use crate::mac::{MacConfig, MacProtocol};
use crate::physical::{AttenuationConfig, FrequencyBandSpec};

/// Role of a device in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Sensor,
    Actuator,
    Gateway,
}

/// One device of the scene.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Overrides the transmission power of the MAC settings.
    #[serde(default)]
    pub transmission_power_dbm: Option<f64>,
}

/// Root structure representing the entire scene
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scene {
    #[serde(default)]
    pub band: FrequencyBandSpec,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default = "default_attenuation")]
    pub attenuation: Vec<AttenuationConfig>,
    pub devices: Vec<DeviceSpec>,
    /// Number of schedules the gateway announces.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// TDMA slots per schedule. Defaults to one per sensor and two per actuator.
    #[serde(default)]
    pub slots_per_frame: Option<u32>,
    /// CSMA transmit probability of every sensor.
    #[serde(default = "default_csma_probability")]
    pub csma_probability: f64,
    /// CSMA slots per schedule. Defaults to the TDMA frame length.
    #[serde(default)]
    pub csma_slots: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_attenuation() -> Vec<AttenuationConfig> {
    vec![AttenuationConfig::Fspl]
}

fn default_rounds() -> u32 {
    10
}

fn default_csma_probability() -> f64 {
    0.2
}

impl Scene {
    /// Parse and validate a scene.
    pub fn from_json(data: &str) -> SimResult<Self> {
        let scene: Scene = serde_json::from_str(data).map_err(|e| SimError::InvalidScene(e.to_string()))?;
        validate_scene(&scene)?;
        Ok(scene)
    }

    pub fn count(&self, kind: DeviceKind) -> usize {
        self.devices.iter().filter(|d| d.kind == kind).count()
    }

    /// Slots of one schedule for the configured protocol.
    pub fn slots_per_frame(&self) -> u32 {
        let default = (self.count(DeviceKind::Sensor) + 2 * self.count(DeviceKind::Actuator)).max(1) as u32;
        match self.mac.protocol {
            MacProtocol::Tdma => self.slots_per_frame.unwrap_or(default),
            MacProtocol::Csma => self.csma_slots.or(self.slots_per_frame).unwrap_or(default),
        }
    }

    /// Time between two announcements: the announcement slot plus the schedule's slots.
    pub fn round_length(&self) -> std::time::Duration {
        self.mac.slot_length() * (self.slots_per_frame() + 1)
    }

    /// MAC settings of one device, with its power override applied.
    pub fn mac_config_for(&self, device: &DeviceSpec) -> MacConfig {
        let mut config = self.mac.clone();
        if let Some(power) = device.transmission_power_dbm {
            config.transmission_power_dbm = power;
        }
        config
    }
}

/// Validate scene configuration.
///
/// Performs sanity checks on:
/// - Device count, roles and names
/// - Positions and transmission powers
/// - Band, slot length and schedule parameters
/// - Path loss parameters
///
/// # Returns
///
/// `Ok(())` if validation passes, `SimError::InvalidScene` (or
/// `SimError::ProbabilitySum` for oversubscribed CSMA) otherwise.
pub fn validate_scene(scene: &Scene) -> SimResult<()> {
    const MIN_POWER_DBM: f64 = -50.0;
    const MAX_POWER_DBM: f64 = 50.0;
    const MAX_DEVICES: usize = 10_000;

    let invalid = |reason: String| -> SimResult<()> { Err(SimError::InvalidScene(reason)) };

    if scene.count(DeviceKind::Gateway) != 1 {
        return invalid(format!("Scene needs exactly one gateway, found {}", scene.count(DeviceKind::Gateway)));
    }
    if scene.devices.len() < 2 {
        return invalid("Scene needs at least one sensor or actuator".to_string());
    }
    if scene.devices.len() > MAX_DEVICES {
        return invalid(format!("Device count {} exceeds maximum of {}", scene.devices.len(), MAX_DEVICES));
    }

    let mut names = HashSet::new();
    for device in &scene.devices {
        if !names.insert(device.name.as_str()) {
            return invalid(format!("Duplicate device name: {}", device.name));
        }
        if !device.x.is_finite() || !device.y.is_finite() {
            return invalid(format!("Device {} has a non-finite position", device.name));
        }
        let power = device.transmission_power_dbm.unwrap_or(scene.mac.transmission_power_dbm);
        if !(MIN_POWER_DBM..=MAX_POWER_DBM).contains(&power) {
            return invalid(format!(
                "Device {} transmission power {} dBm outside realistic range ({} to {} dBm)",
                device.name, power, MIN_POWER_DBM, MAX_POWER_DBM
            ));
        }
    }

    if scene.band.frequency <= 0.0 || scene.band.bandwidth <= 0.0 {
        return invalid("Band frequency and bandwidth must be positive".to_string());
    }
    if !(scene.mac.slot_length_secs > 0.0 && scene.mac.slot_length_secs.is_finite()) {
        return invalid(format!("Invalid slot length {}, must be positive", scene.mac.slot_length_secs));
    }
    if scene.rounds == 0 {
        return invalid("Scene needs at least one round".to_string());
    }
    if scene.slots_per_frame() == 0 {
        return invalid("Schedules need at least one slot".to_string());
    }
    if !(0.0..=1.0).contains(&scene.csma_probability) {
        return invalid(format!("Invalid csma_probability {}, must be within [0, 1]", scene.csma_probability));
    }
    if scene.mac.protocol == MacProtocol::Csma {
        let sum = scene.csma_probability * scene.count(DeviceKind::Sensor) as f64;
        if sum > 1.0 {
            return Err(SimError::ProbabilitySum { sum });
        }
    }

    for component in &scene.attenuation {
        if let AttenuationConfig::LogDistance(params) = component {
            if params.path_loss_exponent <= 0.0 {
                return invalid("Invalid path_loss_exponent, must be positive".to_string());
            }
            if params.shadowing_sigma < 0.0 {
                return invalid("Invalid shadowing_sigma, must be non-negative".to_string());
            }
        }
    }

    Ok(())
}
