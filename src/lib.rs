//! Per-instance database HA agent.
//!
//! The library holds everything that does not depend on a transport: the
//! cluster model read from the DCS, the [`engine::DbManager`] contract that
//! engine adapters implement, the operation dispatcher, volume protection and
//! event reporting. `warden-http` serves the dispatcher and `warden-probe` is
//! the matching client.

pub mod config;
pub mod dcs;
pub mod engine;
pub mod error;
pub mod events;
pub mod operations;
pub mod probe;
pub mod volume;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::AgentConfig;
pub use error::{Result, WardenError};
pub use operations::{Dispatcher, Operation, OperationContext};
pub use probe::{OpsEvent, OpsResult, ProbeRequest, ProbeResponse};
