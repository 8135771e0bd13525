//! A message-oriented duplex channel over an upgraded byte stream.
//!
//! Reads and writes are independently serialized, so one task may block in
//! [`Connection::recv`] while others call [`Connection::send`]. Ping frames
//! are answered automatically and a quiet peer is probed with a ping after
//! [`ConnectionConfig::read_timeout`].

use crate::error::WsError;
use crate::frame::{build_frame, parse_frame, FrameError, Opcode};
use crate::tls::MaybeTlsStream;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

const READ_CHUNK: usize = 8 * 1024;

/// Payload carried by keepalive pings.
pub const KEEPALIVE_PAYLOAD: &[u8] = b"ping";

/// Which end of the handshake this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialed the peer; masks every outbound frame.
    Client,
    /// Accepted the peer; never masks.
    Server,
}

impl Role {
    const fn masks(self) -> bool {
        matches!(self, Self::Client)
    }
}

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Frames may flow in both directions.
    Open,
    /// No further frames are sent or delivered.
    Closed,
}

/// Per-connection tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Idle time before a keepalive ping is sent.
    pub read_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
        }
    }
}

struct ReadState<S> {
    half: ReadHalf<S>,
    buf: Vec<u8>,
}

/// An open WebSocket connection.
pub struct Connection<S = MaybeTlsStream> {
    reader: Mutex<ReadState<S>>,
    writer: Mutex<WriteHalf<S>>,
    role: Role,
    state: watch::Sender<ConnState>,
    peer_addr: Option<SocketAddr>,
    config: ConnectionConfig,
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &*self.state.borrow())
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wraps an already-upgraded stream.
    #[must_use]
    pub fn new(stream: S, role: Role, config: ConnectionConfig) -> Self {
        Self::with_buffered(stream, Vec::new(), role, config)
    }

    /// Wraps an upgraded stream whose first bytes were read during the
    /// handshake.
    #[must_use]
    pub fn with_buffered(stream: S, leftover: Vec<u8>, role: Role, config: ConnectionConfig) -> Self {
        let (half, writer) = tokio::io::split(stream);
        let (state, _) = watch::channel(ConnState::Open);
        Self {
            reader: Mutex::new(ReadState {
                half,
                buf: leftover,
            }),
            writer: Mutex::new(writer),
            role,
            state,
            peer_addr: None,
            config,
        }
    }

    /// Records the remote socket address.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Remote address, when the stream is a socket.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Which side of the handshake this is.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        *self.state.borrow()
    }

    /// `true` once the connection has closed for any reason.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnState::Closed
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        wait_closed(&mut rx).await;
    }

    /// Sends `data` as one binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ConnectionClosed`] after close, or the write error
    /// that closed the connection.
    pub async fn send(&self, data: &[u8]) -> Result<(), WsError> {
        self.send_opcode(data, Opcode::Binary).await
    }

    /// Sends `text` as one text frame.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_text(&self, text: &str) -> Result<(), WsError> {
        self.send_opcode(text.as_bytes(), Opcode::Text).await
    }

    async fn send_opcode(&self, data: &[u8], opcode: Opcode) -> Result<(), WsError> {
        if self.is_closed() {
            return Err(WsError::ConnectionClosed);
        }
        if let Err(e) = self.write_frame(data, opcode).await {
            self.mark_closed();
            return Err(e);
        }
        Ok(())
    }

    async fn write_frame(&self, payload: &[u8], opcode: Opcode) -> Result<(), WsError> {
        let frame = build_frame(payload, opcode, self.role.masks());
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Waits for the next text or binary payload.
    ///
    /// Returns `Ok(None)` once the connection is closed, whether by a close
    /// frame, end of stream, or a local [`Connection::close`].
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Protocol`] for undecodable or fragmented frames and
    /// [`WsError::Io`] for socket failures. Both close the connection.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>, WsError> {
        let mut closed_rx = self.state.subscribe();
        let mut reader = self.reader.lock().await;
        let reader = &mut *reader;

        loop {
            if self.is_closed() {
                return Ok(None);
            }

            match parse_frame(&reader.buf) {
                Err(e) => {
                    self.mark_closed();
                    return Err(e.into());
                }
                Ok(Some((frame, consumed))) => {
                    reader.buf.drain(..consumed);
                    match frame.opcode {
                        Opcode::Text | Opcode::Binary => return Ok(Some(frame.payload)),
                        Opcode::Ping => {
                            if let Err(e) = self.write_frame(&frame.payload, Opcode::Pong).await {
                                tracing::debug!(error = %e, "pong write failed");
                            }
                        }
                        Opcode::Pong => {}
                        Opcode::Close => {
                            self.close().await;
                            return Ok(None);
                        }
                        Opcode::Continuation => {
                            self.mark_closed();
                            return Err(FrameError::Fragmented.into());
                        }
                    }
                    continue;
                }
                Ok(None) => {}
            }

            reader.buf.reserve(READ_CHUNK);
            tokio::select! {
                () = wait_closed(&mut closed_rx) => return Ok(None),
                res = tokio::time::timeout(
                    self.config.read_timeout,
                    reader.half.read_buf(&mut reader.buf),
                ) => match res {
                    Err(_elapsed) => {
                        tracing::trace!("read idle, sending keepalive ping");
                        if let Err(e) = self.write_frame(KEEPALIVE_PAYLOAD, Opcode::Ping).await {
                            self.mark_closed();
                            return Err(e);
                        }
                    }
                    Ok(Ok(0)) => {
                        self.mark_closed();
                        return Ok(None);
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        self.mark_closed();
                        return Err(e.into());
                    }
                },
            }
        }
    }

    /// Closes the connection. Idempotent.
    ///
    /// Sends a close frame and shuts down the write side on a best-effort
    /// basis; pending [`Connection::recv`] calls return `Ok(None)`.
    pub async fn close(&self) {
        if self.state.send_replace(ConnState::Closed) == ConnState::Closed {
            return;
        }
        let frame = build_frame(&[], Opcode::Close, self.role.masks());
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(&frame).await;
        let _ = writer.shutdown().await;
    }

    fn mark_closed(&self) {
        self.state.send_replace(ConnState::Closed);
    }
}

async fn wait_closed(rx: &mut watch::Receiver<ConnState>) {
    loop {
        let closed = *rx.borrow_and_update() == ConnState::Closed;
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}
