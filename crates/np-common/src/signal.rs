//! Neural signal binary serialization and parsing.
//!
//! A signal is a fixed 34-byte header followed by three variable sections:
//!
//! ```text
//! [magic "NP"][version][type][timestamp f64][msg id 16B]
//! [source len u8][target len u8][payload len u32]
//! [source bytes][target bytes][JSON payload bytes]
//! ```
//!
//! All integers and the timestamp are big-endian.

use crate::types::{
    unix_now_f64, MessageId, SignalType, DEFAULT_TTL, HEADER_LEN, MAGIC, MESSAGE_ID_LEN, VERSION,
};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// String-keyed JSON object carried by a signal.
pub type Payload = Map<String, Value>;

/// A typed message between two agent identities, or a broadcast when
/// `target` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Kind of signal.
    pub signal_type: SignalType,
    /// Sender hash.
    pub source: String,
    /// Receiver hash or logical name; empty for broadcast.
    pub target: String,
    /// JSON object payload.
    pub payload: Payload,
    /// Message identifier.
    pub msg_id: MessageId,
    /// Creation time in Unix seconds.
    pub timestamp: f64,
    /// Advisory time-to-live. Not carried on the wire.
    pub ttl: u32,
}

/// Errors raised while encoding or decoding a signal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedSignal {
    /// The buffer is shorter than the header or the declared sections.
    #[error("signal too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The leading marker is not `NP`.
    #[error("invalid magic: {0:02x?}")]
    BadMagic([u8; 2]),
    /// The version byte is not supported.
    #[error("unsupported signal version {0}")]
    UnsupportedVersion(u8),
    /// The type byte does not name a known signal kind.
    #[error("unknown signal type {0}")]
    UnknownSignalType(u8),
    /// Source or target is not valid UTF-8.
    #[error("{0} is not valid utf-8")]
    InvalidUtf8(&'static str),
    /// The payload section is not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Source or target exceeds the 255-byte length field.
    #[error("{field} too long: {len} bytes (max 255)")]
    FieldTooLong {
        /// Which field overflowed.
        field: &'static str,
        /// Its length in bytes.
        len: usize,
    },
}

impl Signal {
    /// Creates a signal with a fresh message id and the current timestamp.
    #[must_use]
    pub fn new(
        signal_type: SignalType,
        source: impl Into<String>,
        target: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            signal_type,
            source: source.into(),
            target: target.into(),
            payload,
            msg_id: MessageId::random(),
            timestamp: unix_now_f64(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Returns `true` when the signal addresses every agent.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.target.is_empty()
    }

    /// Serializes this signal into its binary wire form.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedSignal::FieldTooLong`] when the source or target
    /// does not fit its one-byte length field.
    ///
    /// # Examples
    ///
    /// ```
    /// use np_common::{Signal, SignalType};
    /// let sig = Signal::new(SignalType::Dopamine, "abc", "def", Default::default());
    /// let bytes = sig.encode().unwrap();
    /// assert_eq!(&bytes[..2], b"NP");
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>, MalformedSignal> {
        let src = self.source.as_bytes();
        let tgt = self.target.as_bytes();
        let src_len = u8::try_from(src.len()).map_err(|_| MalformedSignal::FieldTooLong {
            field: "source",
            len: src.len(),
        })?;
        let tgt_len = u8::try_from(tgt.len()).map_err(|_| MalformedSignal::FieldTooLong {
            field: "target",
            len: tgt.len(),
        })?;
        let payload = serde_json::to_vec(&self.payload)
            .map_err(|e| MalformedSignal::InvalidPayload(e.to_string()))?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            MalformedSignal::InvalidPayload(format!("payload too large: {}", payload.len()))
        })?;

        let mut v = Vec::with_capacity(HEADER_LEN + src.len() + tgt.len() + payload.len());
        v.extend_from_slice(MAGIC);
        v.push(VERSION);
        v.push(self.signal_type as u8);
        v.extend_from_slice(&self.timestamp.to_be_bytes());
        v.extend_from_slice(&self.msg_id.0);
        v.push(src_len);
        v.push(tgt_len);
        v.extend_from_slice(&payload_len.to_be_bytes());
        v.extend_from_slice(src);
        v.extend_from_slice(tgt);
        v.extend_from_slice(&payload);
        Ok(v)
    }

    /// Parses a byte slice into a `Signal`.
    ///
    /// Never reads past the end of `data`; trailing bytes after the
    /// declared payload are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedSignal`] if the buffer is truncated, carries the
    /// wrong magic or version, or its sections do not decode.
    pub fn decode(data: &[u8]) -> Result<Self, MalformedSignal> {
        if data.len() < HEADER_LEN {
            return Err(MalformedSignal::TooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }
        if &data[0..2] != MAGIC {
            return Err(MalformedSignal::BadMagic([data[0], data[1]]));
        }
        if data[2] != VERSION {
            return Err(MalformedSignal::UnsupportedVersion(data[2]));
        }
        let signal_type =
            SignalType::from_u8(data[3]).ok_or(MalformedSignal::UnknownSignalType(data[3]))?;
        let timestamp = f64::from_be_bytes(to_array(&data[4..12])?);
        let msg_id = MessageId(to_array::<MESSAGE_ID_LEN>(&data[12..28])?);
        let src_len = usize::from(data[28]);
        let tgt_len = usize::from(data[29]);
        let payload_len = u32::from_be_bytes(to_array(&data[30..34])?) as usize;

        let total = HEADER_LEN + src_len + tgt_len + payload_len;
        if data.len() < total {
            return Err(MalformedSignal::TooShort {
                expected: total,
                actual: data.len(),
            });
        }

        let mut offset = HEADER_LEN;
        let source = std::str::from_utf8(&data[offset..offset + src_len])
            .map_err(|_| MalformedSignal::InvalidUtf8("source"))?
            .to_owned();
        offset += src_len;
        let target = std::str::from_utf8(&data[offset..offset + tgt_len])
            .map_err(|_| MalformedSignal::InvalidUtf8("target"))?
            .to_owned();
        offset += tgt_len;
        let payload: Payload = serde_json::from_slice(&data[offset..offset + payload_len])
            .map_err(|e| MalformedSignal::InvalidPayload(e.to_string()))?;

        Ok(Self {
            signal_type,
            source,
            target,
            payload,
            msg_id,
            timestamp,
            ttl: DEFAULT_TTL,
        })
    }

    /// Encoded size in bytes, or 0 if the signal cannot be encoded.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.encode().map(|v| v.len()).unwrap_or(0)
    }
}

fn to_array<const N: usize>(data: &[u8]) -> Result<[u8; N], MalformedSignal> {
    data.try_into().map_err(|_| MalformedSignal::TooShort {
        expected: N,
        actual: data.len(),
    })
}

fn short(s: &str) -> &str {
    s.get(..8).unwrap_or(s)
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = if self.is_broadcast() {
            "BROADCAST"
        } else {
            short(&self.target)
        };
        let keys: Vec<&str> = self.payload.keys().map(String::as_str).collect();
        write!(
            f,
            "[{}] {}->{} | {}B | payload_keys={:?}",
            self.signal_type,
            short(&self.source),
            target,
            self.size_bytes(),
            keys
        )
    }
}
