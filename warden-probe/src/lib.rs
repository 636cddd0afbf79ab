//! Client side of the probe transport.
//!
//! [`ProbeClient`] talks to one agent; [`Fleet`] fans a query out to every
//! configured peer.

pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod fleet;

pub use client::ProbeClient;
pub use config::{ClientConfig, FleetConfig, PeerConfig};
pub use error::{ProbeError, Result};
pub use fleet::Fleet;
