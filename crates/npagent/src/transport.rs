//! Delivery fabric seam shared by every agent runtime.

use async_trait::async_trait;
use np_common::{MalformedSignal, Signal};
use thiserror::Error;

/// Errors raised by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// No mailbox exists for the given hash.
    #[error("no mailbox registered for {0}")]
    NotRegistered(String),
    /// A queued message failed to decode.
    #[error("malformed signal: {0}")]
    Malformed(#[from] MalformedSignal),
    /// The outgoing signal could not be encoded.
    #[error("cannot encode signal: {0}")]
    Encode(MalformedSignal),
}

/// Name/hash directory plus signal delivery between registered agents.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create the mailbox for `neural_hash` and map `name` to it.
    async fn register_agent(&self, name: &str, neural_hash: &str);

    /// Drop the mailbox and name mapping for `neural_hash`.
    async fn unregister_agent(&self, neural_hash: &str);

    /// Hash registered under `name`, if any.
    fn resolve(&self, name: &str) -> Option<String>;

    /// Deliver a signal. Returns `true` if at least one recipient accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the signal cannot be encoded.
    async fn send(&self, signal: &Signal) -> Result<bool, TransportError>;

    /// Wait for the next signal addressed to `neural_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotRegistered`] if there is no mailbox for
    /// the hash, or [`TransportError::Malformed`] if the queued bytes do not
    /// decode.
    async fn receive(&self, neural_hash: &str) -> Result<Signal, TransportError>;
}
