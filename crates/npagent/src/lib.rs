//! Neural protocol agent runtime: in-process mailboxes, a hub link with
//! automatic reconnection, and signal dispatch.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// In-process agent over any transport.
pub mod agent;
/// Exponential backoff for hub reconnection.
pub mod backoff;
/// CLI parsing and TOML configuration.
pub mod config;
/// Signal handler trait and per-kind dispatch table.
pub mod handler;
/// Hub-connected agent with reconnect state machine.
pub mod link;
/// Bounded in-process mailboxes.
pub mod local;
/// Delivery fabric trait.
pub mod transport;

pub use agent::{Agent, StopHandle};
pub use handler::{Handlers, NoHandler, SignalHandler};
pub use link::{HubAgent, LinkError, LinkState};
pub use local::{LocalTransport, TransportStats};
pub use transport::{Transport, TransportError};
