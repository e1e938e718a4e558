//! Error types shared by the simulation library.
//!
//! Every variant is a configuration error: something the wiring of a stack or
//! the input to a component got wrong. Physical-layer losses are not errors and
//! never show up here.

use thiserror::Error;

/// Fatal configuration error raised by a simulated component.
///
/// Errors raised synchronously are returned to the caller. Errors raised from
/// inside a running process are reported through `SimContext::fail` and abort
/// the next `Simulation::run_until` call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("{owner} already has a {what} named '{name}'")]
    DuplicateName { owner: String, what: &'static str, name: String },

    #[error("{owner} has no gate named '{name}'")]
    UnknownGate { owner: String, name: String },

    #[error("gate '{gate}' of {instance} received a {got}, expected one of {expected:?}")]
    MessageTypeMismatch {
        gate: String,
        instance: String,
        expected: Vec<&'static str>,
        got: &'static str,
    },

    #[error("{layer} received a packet with a {got} header")]
    UnexpectedHeader { layer: String, got: &'static str },

    #[error("{layer} cannot handle {got}")]
    UnexpectedMessage { layer: String, got: String },

    #[error("an attenuation model needs two distinct devices, got {device} twice")]
    SameDevice { device: String },

    #[error("transmission from {sender} carries no bits")]
    EmptyTransmission { sender: String },

    #[error("CSMA schedule probabilities sum to {sum}, which exceeds 1")]
    ProbabilitySum { sum: f64 },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid MAC address '{0}'")]
    InvalidAddress(String),

    #[error("invalid scene: {0}")]
    InvalidScene(String),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the library.
pub type SimResult<T> = Result<T, SimError>;
