//! Transport-level errors.

use crate::frame::FrameError;
use crate::handshake::HandshakeError;
use crate::tls::TlsError;
use thiserror::Error;

/// Errors raised by connections, the client connector and the listener.
#[derive(Debug, Error)]
pub enum WsError {
    /// The peer violated the framing rules.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
    /// The upgrade handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeRejected(#[from] HandshakeError),
    /// TLS setup or handshake failed.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// The connection is closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// Every dial attempt failed.
    #[error("connect failed after {attempts} attempts: {last}")]
    ConnectFailed {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<WsError>,
    },
    /// An operation did not complete in time.
    #[error("operation timed out")]
    Timeout,
    /// Underlying socket error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
