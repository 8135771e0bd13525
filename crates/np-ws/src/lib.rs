//! Minimal RFC 6455 WebSocket transport over TCP (`ws://`) or TLS (`wss://`).
//!
//! Every frame is sent with FIN=1; fragmented input is a protocol error.
//! Extensions and subprotocols are not negotiated.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
/// Message-oriented duplex channel over a byte stream.
pub mod connection;
/// Error types for WebSocket operations.
pub mod error;
/// Single-frame encoding and decoding.
pub mod frame;
/// HTTP upgrade request/response handling.
pub mod handshake;
pub mod server;
pub mod tls;

pub use client::{connect, ConnectOptions};
pub use connection::{ConnState, Connection, ConnectionConfig, Role};
pub use error::WsError;
pub use frame::{Frame, FrameError, Opcode};
pub use handshake::HandshakeError;
pub use server::{accept, serve, serve_with_shutdown};
pub use tls::{MaybeTlsStream, TlsError};
