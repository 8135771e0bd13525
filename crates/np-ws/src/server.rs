//! Accept loop and server-side handshake, over TCP or TLS.

use crate::client::read_header;
use crate::connection::{Connection, ConnectionConfig, Role};
use crate::error::WsError;
use crate::handshake::{build_server_response, parse_request, validate_request, BAD_REQUEST};
use crate::tls::{MaybeTlsStream, TlsError};
use rustls::ServerConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Time allowed for a client to send its upgrade request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for in-flight connections after shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the server side of the upgrade over an accepted stream.
///
/// A request without `Upgrade: websocket` or without a key is answered with
/// `400 Bad Request` and the stream is shut down.
///
/// # Errors
///
/// Returns [`WsError::HandshakeRejected`] for refused requests,
/// [`WsError::Timeout`] if the request does not arrive in time, and
/// [`WsError::Io`] for socket failures.
pub async fn accept<S>(mut stream: S, config: ConnectionConfig) -> Result<Connection<S>, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (request, leftover) = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_header(&mut stream))
        .await
        .map_err(|_| WsError::Timeout)??;

    let key = match validate_request(&parse_request(&request)) {
        Ok(key) => key,
        Err(e) => {
            let _ = stream.write_all(BAD_REQUEST).await;
            let _ = stream.shutdown().await;
            return Err(e.into());
        }
    };

    stream.write_all(&build_server_response(&key)).await?;
    stream.flush().await?;
    Ok(Connection::with_buffered(stream, leftover, Role::Server, config))
}

/// Accepts plain `ws://` connections forever, handing each upgraded one to
/// `handler`.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve<H, Fut>(
    listener: TcpListener,
    config: ConnectionConfig,
    handler: H,
) -> Result<(), WsError>
where
    H: Fn(Connection, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    serve_with_shutdown(listener, config, None, handler, shutdown_rx).await
}

/// Accept loop with an externally controlled shutdown signal.
///
/// With `tls` set every connection runs the TLS handshake before the
/// upgrade (`wss://`). Each connection is handshaken and handled on its own
/// task. When the shutdown sender fires or is dropped the loop stops
/// accepting and waits up to [`DRAIN_TIMEOUT`] for in-flight handlers.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve_with_shutdown<H, Fut>(
    listener: TcpListener,
    config: ConnectionConfig,
    tls: Option<Arc<ServerConfig>>,
    handler: H,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), WsError>
where
    H: Fn(Connection, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    let acceptor = tls.map(TlsAcceptor::from);
    info!(
        tls = acceptor.is_some(),
        "websocket listener on {}", local_addr
    );
    let handler = Arc::new(handler);
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let handler = Arc::clone(&handler);
                    let acceptor = acceptor.clone();
                    tasks.spawn(async move {
                        match upgrade(stream, addr, config, acceptor).await {
                            Ok(conn) => handler(conn, addr).await,
                            Err(e) => debug!("handshake with {} failed: {}", addr, e),
                        }
                    });
                }
                Err(e) => error!("failed to accept connection: {}", e),
            },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            tasks.len()
        );
        tasks.abort_all();
    }

    info!("listener shut down");
    Ok(())
}

async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    config: ConnectionConfig,
    acceptor: Option<TlsAcceptor>,
) -> Result<Connection, WsError> {
    stream.set_nodelay(true)?;
    let stream = match acceptor {
        Some(acceptor) => {
            let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream))
                .await
                .map_err(|_| WsError::Timeout)?
                .map_err(TlsError::Handshake)?;
            MaybeTlsStream::Server(Box::new(tls))
        }
        None => MaybeTlsStream::Plain(stream),
    };
    Ok(accept(stream, config).await?.with_peer_addr(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakeError;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn missing_key_gets_400() {
        let (a, mut client) = tokio::io::duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n")
            .await
            .unwrap();
        let res = accept(a, ConnectionConfig::default()).await;
        assert!(matches!(
            res,
            Err(WsError::HandshakeRejected(HandshakeError::MissingKey))
        ));
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 400 Bad Request"));
    }

    #[tokio::test]
    async fn plain_http_gets_400() {
        let (a, mut client) = tokio::io::duplex(4096);
        client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        assert!(matches!(
            accept(a, ConnectionConfig::default()).await,
            Err(WsError::HandshakeRejected(HandshakeError::NotUpgrade))
        ));
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (a, mut client) = tokio::io::duplex(64 * 1024);
        let junk = vec![b'a'; 10 * 1024];
        client.write_all(&junk).await.unwrap();
        assert!(matches!(
            accept(a, ConnectionConfig::default()).await,
            Err(WsError::HandshakeRejected(HandshakeError::HeaderTooLarge))
        ));
    }
}
