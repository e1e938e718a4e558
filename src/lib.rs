//! Network stack of a wireless networked control system, simulated in virtual time.
//!
//! Sensors report measurements to a gateway, the gateway sends control values
//! to actuators, and all of them share one radio band. The crate models the
//! parts between the applications and the air:
//!
//! - `simulation`: the discrete-event runtime, notifiers and the scenario runner
//! - `construction`: ports, gates, modules and listener binding
//! - `physical`: path loss, the shared band and the PHY with bit error tracking
//! - `mac`: sensor, actuator and gateway MACs
//! - `schedule`: TDMA and CSMA schedules and the schedulers producing them

pub mod config;
pub mod construction;
pub mod devices;
pub mod error;
pub mod mac;
pub mod messages;
pub mod physical;
pub mod schedule;
pub mod simulation;
pub mod time_driver;

pub use error::{SimError, SimResult};
