//! Common types and codecs shared across the neural protocol stack.
//!
//! This crate provides:
//! - Binary signal serialization and parsing ([`signal`])
//! - Agent identities and their routable hashes ([`identity`])
//! - Adaptive per-edge synapses ([`synapse`])
//! - The `_ctrl` control channel multiplexed with signals ([`control`])
//! - Signal kinds and wire constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod identity;
pub mod signal;
pub mod synapse;
pub mod types;

pub use control::{Control, Envelope, EnvelopeError};
pub use identity::Identity;
pub use signal::{MalformedSignal, Signal};
pub use synapse::Synapse;
pub use types::{MessageId, SignalType};
