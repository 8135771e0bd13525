//! Neural protocol hub: agents register by name and hash, then exchange
//! signals routed by hash, by name (round robin) or by broadcast.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and hub configuration.
pub mod config;
mod connection;
/// Error types for hub operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Hash and name routing table for connected agents.
pub mod router;
/// Accept loop and shared hub state.
pub mod server;

pub use error::HubError;
pub use server::{run, run_with_shutdown, HubState};
