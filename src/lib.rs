//! Virtual heat-pump fleet library.
//!
//! Simulates a fleet of smart-home heat pumps and streams their state to
//! WebSocket subscribers, deliberately injecting send failures, sensor
//! corruption, and connection death to exercise client resilience.

pub mod backchannel;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;

pub use error::{FleetError, Result};
