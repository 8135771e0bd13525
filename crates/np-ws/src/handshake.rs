//! HTTP/1.1 upgrade handshake (RFC 6455 §4).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use thiserror::Error;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Blank line ending an HTTP header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Largest header block accepted from either side.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

/// Response written when an upgrade request is refused.
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";

/// Reasons a handshake is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The request has no `Sec-WebSocket-Key` header.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// The request does not carry `Upgrade: websocket`.
    #[error("not a websocket upgrade request")]
    NotUpgrade,
    /// The server answered with something other than `101`.
    #[error("handshake rejected: {0}")]
    NotSwitchingProtocols(String),
    /// The server's `Sec-WebSocket-Accept` does not match our key.
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,
    /// The header block exceeded [`MAX_HEADER_LEN`].
    #[error("handshake header exceeds {MAX_HEADER_LEN} bytes")]
    HeaderTooLarge,
    /// The peer closed the stream before the header block ended.
    #[error("stream closed during handshake")]
    Incomplete,
}

/// A parsed upgrade request: request line plus lower-cased headers.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Request target, e.g. `/`.
    pub path: String,
    /// Header names lower-cased, values trimmed.
    pub headers: HashMap<String, String>,
}

impl UpgradeRequest {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// `base64(SHA-1(key ‖ GUID))`.
///
/// # Examples
///
/// ```
/// use np_ws::handshake::compute_accept_key;
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Position just past the header terminator, if present.
#[must_use]
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|p| p + HEADER_TERMINATOR.len())
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
        .collect()
}

/// Parses an HTTP request header block.
#[must_use]
pub fn parse_request(data: &[u8]) -> UpgradeRequest {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let path = request_line.next().unwrap_or("/").to_owned();
    UpgradeRequest {
        method,
        path,
        headers: parse_headers(lines.take_while(|l| !l.is_empty())),
    }
}

/// Checks an upgrade request and returns its client key.
///
/// # Errors
///
/// Returns [`HandshakeError::NotUpgrade`] or [`HandshakeError::MissingKey`].
pub fn validate_request(req: &UpgradeRequest) -> Result<String, HandshakeError> {
    let is_upgrade = req
        .header("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if !is_upgrade {
        return Err(HandshakeError::NotUpgrade);
    }
    req.header("sec-websocket-key")
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .ok_or(HandshakeError::MissingKey)
}

/// Builds the `101 Switching Protocols` response for `client_key`.
#[must_use]
pub fn build_server_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        compute_accept_key(client_key)
    )
    .into_bytes()
}

/// Builds a client upgrade request with a random 16-byte key.
///
/// Returns the request bytes and the base64 key sent.
#[must_use]
pub fn build_client_request(host: &str, port: u16, path: &str) -> (Vec<u8>, String) {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    let key = BASE64.encode(raw);
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    (request.into_bytes(), key)
}

/// Checks the server's response to a request sent with `client_key`.
///
/// The status line must carry `101`. When the server includes
/// `Sec-WebSocket-Accept` it must match the key.
///
/// # Errors
///
/// Returns [`HandshakeError::NotSwitchingProtocols`] or
/// [`HandshakeError::AcceptMismatch`].
pub fn validate_response(data: &[u8], client_key: &str) -> Result<(), HandshakeError> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "101" {
        return Err(HandshakeError::NotSwitchingProtocols(
            status_line.chars().take(100).collect(),
        ));
    }
    let headers = parse_headers(lines.take_while(|l| !l.is_empty()));
    match headers.get("sec-websocket-accept") {
        Some(accept) if *accept != compute_accept_key(client_key) => {
            Err(HandshakeError::AcceptMismatch)
        }
        _ => Ok(()),
    }
}
