use np_common::control::EnvelopeError;
use np_ws::WsError;
use thiserror::Error;

/// Errors that end a hub connection.
#[derive(Error, Debug)]
pub enum HubError {
    /// Transport failure on the agent's connection.
    #[error("websocket error: {0}")]
    Ws(#[from] WsError),
    /// An inbound payload could not be classified.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    /// The agent did not register correctly.
    #[error("registration failed: {0}")]
    Registration(String),
    /// The agent closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
