//! Physical layer: the radio medium, path loss, modulation and the PHY module.
//!
//! ## Module Organization
//!
//! - `signal_calculations`: unit conversions, noise, path loss and error rate formulas
//! - `mcs`: modulation and coding schemes
//! - `transmission`: packets on the air and their timing
//! - `frequency_band`: the shared medium and its transmission registry
//! - `attenuation`: per device pair path loss that follows device movement
//! - `phy`: the half-duplex PHY module

pub mod attenuation;
pub mod frequency_band;
pub mod mcs;
pub mod phy;
pub mod signal_calculations;
pub mod transmission;

pub use attenuation::{
    AttenuationConfig, AttenuationModel, AttenuationModelFactory, FsplAttenuation, LogDistanceAttenuation, PathLoss,
    STANDBY_THRESHOLD,
};
pub use frequency_band::{FrequencyBand, FrequencyBandSpec};
pub use mcs::{BpskMcs, Mcs};
pub use phy::{MAC_GATE, PhyStats, SimplePhy, TIME_SLOT_LENGTH};
pub use transmission::{Transmission, TransmissionId};
