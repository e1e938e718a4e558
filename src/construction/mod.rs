//! Composition framework for layered protocol stacks.
//!
//! - `port`: one-way conduits with synchronous callback delivery
//! - `gate`: input/output port pairs and their wiring helpers
//! - `module`: named owners of gates and sub-modules
//! - `listener`: explicit binding of handlers to gate inputs

pub mod gate;
pub mod listener;
pub mod module;
pub mod port;

pub use gate::Gate;
pub use listener::{GateListener, MessageKind, QueuePolicy};
pub use module::{Module, StackLayer};
pub use port::Port;
