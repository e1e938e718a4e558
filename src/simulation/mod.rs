//! Simulation core.
//!
//! This module provides the discrete-event substrate every component runs on and
//! the scenario runner built from it:
//! - Virtual-time executor and the context handle components keep
//! - One-shot events and multi-subscriber notifiers
//! - Scene loading and validation
//! - Application-side processes driving sensors and the gateway
//! - Logging stamped with virtual time
//!
//! ## Module Organization
//!
//! - `runtime`: [`Simulation`] and [`SimContext`]
//! - `event`: [`Event`], a value that is set at most once
//! - `notifier`: [`Notifier`], fan-out to callbacks and processes
//! - `types`: [`Scene`] and its validation
//! - `node_task`: feeder, controller and recorders of the scenario
//! - `network`: [`Scenario`] and its [`NetworkStats`]
//! - `log_capture`: the [`SimTimeLogger`]

pub mod event;
pub mod log_capture;
pub mod network;
pub mod node_task;
pub mod notifier;
pub mod runtime;
pub mod types;

pub use event::{Event, EventWait};
pub use log_capture::SimTimeLogger;
pub use network::{NetworkStats, Scenario};
pub use notifier::{CallbackId, Notifier, ProcessId, ProcessMode, QUEUE_WARNING_THRESHOLD};
pub use runtime::{DEFAULT_SEED, SimContext, Simulation};
pub use types::{DeviceKind, DeviceSpec, Scene, validate_scene};
