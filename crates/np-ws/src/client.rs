//! Dialing with bounded retries and linear backoff, over TCP or TLS.

use crate::connection::{Connection, ConnectionConfig, Role};
use crate::error::WsError;
use crate::handshake::{
    build_client_request, header_end, validate_response, HandshakeError, MAX_HEADER_LEN,
};
use crate::tls::{server_name, MaybeTlsStream, TlsError};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Time allowed for the server's upgrade response.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how persistently to dial.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Hub host name or address.
    pub host: String,
    /// Hub TCP port.
    pub port: u16,
    /// Request path sent in the upgrade request.
    pub path: String,
    /// Attempts before giving up.
    pub max_retries: u32,
    /// Delay unit; the wait after attempt `n` is `base_delay * n`.
    pub base_delay: Duration,
    /// Settings for the resulting connection.
    pub connection: ConnectionConfig,
    /// TLS settings; `Some` dials `wss://`.
    pub tls: Option<Arc<ClientConfig>>,
}

impl ConnectOptions {
    /// Options for `host:port` with default retry settings.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_owned(),
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            connection: ConnectionConfig::default(),
            tls: None,
        }
    }
}

/// Dials the server and performs the client handshake.
///
/// Failed attempts are retried with a linearly growing delay.
///
/// # Errors
///
/// Returns [`WsError::ConnectFailed`] carrying the last attempt's error once
/// `max_retries` attempts have failed.
pub async fn connect(opts: &ConnectOptions) -> Result<Connection, WsError> {
    let attempts = opts.max_retries.max(1);
    let mut last = WsError::Timeout;
    for attempt in 1..=attempts {
        match connect_once(opts).await {
            Ok(conn) => {
                tracing::debug!(host = %opts.host, port = opts.port, attempt, "connected");
                return Ok(conn);
            }
            Err(e) => {
                tracing::debug!(
                    host = %opts.host,
                    port = opts.port,
                    attempt,
                    attempts,
                    error = %e,
                    "connect attempt failed"
                );
                last = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(opts.base_delay * attempt).await;
        }
    }
    Err(WsError::ConnectFailed {
        attempts,
        last: Box::new(last),
    })
}

async fn connect_once(opts: &ConnectOptions) -> Result<Connection, WsError> {
    let stream = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let stream = match &opts.tls {
        Some(config) => {
            let name = server_name(&opts.host)?;
            let connector = TlsConnector::from(Arc::clone(config));
            let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, connector.connect(name, stream))
                .await
                .map_err(|_| WsError::Timeout)?
                .map_err(TlsError::Handshake)?;
            MaybeTlsStream::Client(Box::new(tls))
        }
        None => MaybeTlsStream::Plain(stream),
    };
    let conn = handshake_client(stream, &opts.host, opts.port, &opts.path, opts.connection).await?;
    Ok(conn.with_peer_addr(peer))
}

/// Runs the client side of the upgrade over an existing stream.
///
/// # Errors
///
/// Returns [`WsError::HandshakeRejected`] if the server refuses or answers
/// with a wrong accept key, and [`WsError::Timeout`] if no complete response
/// arrives within [`HANDSHAKE_TIMEOUT`].
pub async fn handshake_client<S>(
    mut stream: S,
    host: &str,
    port: u16,
    path: &str,
    config: ConnectionConfig,
) -> Result<Connection<S>, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (request, key) = build_client_request(host, port, path);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let (response, leftover) = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_header(&mut stream))
        .await
        .map_err(|_| WsError::Timeout)??;
    validate_response(&response, &key)?;
    Ok(Connection::with_buffered(stream, leftover, Role::Client, config))
}

/// Reads until the end of an HTTP header block.
///
/// Returns the header bytes and anything received after them.
pub(crate) async fn read_header<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>), WsError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = header_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        if buf.len() > MAX_HEADER_LEN {
            return Err(HandshakeError::HeaderTooLarge.into());
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::Incomplete.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
