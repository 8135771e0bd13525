//! RFC 6455 single-frame serialization and parsing.
//!
//! ```text
//! byte 0: FIN(1) RSV(3) opcode(4)
//! byte 1: MASK(1) len(7)
//! [extended len: 2 bytes if len == 126, 8 bytes if len == 127]
//! [masking key: 4 bytes if MASK]
//! payload
//! ```
//!
//! Frames are always built with FIN=1. A received FIN=0 frame is rejected.

use rand::RngCore;
use thiserror::Error;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;

/// Largest payload length carried inline in the second header byte.
pub const MAX_INLINE_LEN: usize = 125;

/// Largest payload accepted in a single frame (64 MiB).
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Frame opcodes defined by RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text payload.
    Text = 0x1,
    /// Binary payload.
    Binary = 0x2,
    /// Close handshake.
    Close = 0x8,
    /// Keepalive probe.
    Ping = 0x9,
    /// Keepalive reply.
    Pong = 0xA,
}

impl Opcode {
    /// Maps the low nibble of the first header byte to an opcode.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Close, ping and pong are control opcodes.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A parsed WebSocket frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: Opcode,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
    /// Whether the payload was masked on the wire.
    pub masked: bool,
}

/// Errors that make a frame undecodable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The opcode nibble is not one of the six defined values.
    #[error("unknown opcode 0x{0:x}")]
    UnknownOpcode(u8),
    /// FIN=0 or a continuation frame; multi-frame messages are not supported.
    #[error("fragmented frames are not supported")]
    Fragmented,
    /// A reserved bit is set without a negotiated extension.
    #[error("reserved bits set: 0x{0:02x}")]
    ReservedBits(u8),
    /// A control frame declares more than 125 payload bytes.
    #[error("control frame payload too large: {0} bytes")]
    ControlTooLarge(u64),
    /// The declared payload exceeds [`MAX_PAYLOAD`].
    #[error("payload too large: max {max}, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed payload size.
        max: usize,
        /// Declared payload size.
        actual: u64,
    },
    /// The 64-bit length has its most significant bit set.
    #[error("invalid 64-bit payload length")]
    InvalidLength,
}

/// Returns 4 random bytes for a masking key.
#[must_use]
pub fn random_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// XORs `data` in place with the repeating 4-byte `key` (RFC 6455 §5.3).
///
/// Applying the same key twice restores the original bytes.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
}

/// Builds a FIN=1 frame; when `mask` is set a fresh random key is used.
///
/// # Examples
///
/// ```
/// use np_ws::frame::{build_frame, Opcode};
/// let bytes = build_frame(b"hi", Opcode::Binary, false);
/// assert_eq!(bytes, [0x82, 0x02, b'h', b'i']);
/// ```
#[must_use]
pub fn build_frame(payload: &[u8], opcode: Opcode, mask: bool) -> Vec<u8> {
    let key = mask.then(random_mask_key);
    build_frame_with_key(payload, opcode, key)
}

/// Builds a FIN=1 frame masked with `key` when one is given.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn build_frame_with_key(payload: &[u8], opcode: Opcode, key: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mask_bit = if key.is_some() { MASK_BIT } else { 0 };
    let mut v = Vec::with_capacity(14 + len);
    v.push(FIN_BIT | opcode as u8);

    if len <= MAX_INLINE_LEN {
        v.push(mask_bit | len as u8);
    } else if let Ok(len16) = u16::try_from(len) {
        v.push(mask_bit | 126);
        v.extend_from_slice(&len16.to_be_bytes());
    } else {
        v.push(mask_bit | 127);
        v.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match key {
        Some(key) => {
            v.extend_from_slice(&key);
            let start = v.len();
            v.extend_from_slice(payload);
            apply_mask(&mut v[start..], key);
        }
        None => v.extend_from_slice(payload),
    }
    v
}

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold the whole frame; the
/// caller should read more bytes and retry. On success returns the frame
/// and the number of bytes it occupied.
///
/// # Errors
///
/// Returns [`FrameError`] as soon as the header is known to be invalid,
/// even if the payload has not fully arrived.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let b0 = buf[0];
    let b1 = buf[1];

    let raw_opcode = b0 & OPCODE_BITS;
    let opcode = Opcode::from_u8(raw_opcode).ok_or(FrameError::UnknownOpcode(raw_opcode))?;
    if b0 & RSV_BITS != 0 {
        return Err(FrameError::ReservedBits(b0 & RSV_BITS));
    }
    if b0 & FIN_BIT == 0 {
        return Err(FrameError::Fragmented);
    }

    let masked = b1 & MASK_BIT != 0;
    let mut offset = 2;
    let declared: u64 = match b1 & LEN_BITS {
        126 => {
            let Some(ext) = buf.get(2..4) else {
                return Ok(None);
            };
            offset += 2;
            u64::from(u16::from_be_bytes([ext[0], ext[1]]))
        }
        127 => {
            let Some(ext) = buf.get(2..10) else {
                return Ok(None);
            };
            offset += 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(ext);
            let len = u64::from_be_bytes(raw);
            if len & (1 << 63) != 0 {
                return Err(FrameError::InvalidLength);
            }
            len
        }
        n => u64::from(n),
    };

    if opcode.is_control() && declared > MAX_INLINE_LEN as u64 {
        return Err(FrameError::ControlTooLarge(declared));
    }
    let len = usize::try_from(declared)
        .ok()
        .filter(|l| *l <= MAX_PAYLOAD)
        .ok_or(FrameError::PayloadTooLarge {
            max: MAX_PAYLOAD,
            actual: declared,
        })?;

    let key = if masked {
        let Some(k) = buf.get(offset..offset + 4) else {
            return Ok(None);
        };
        offset += 4;
        Some([k[0], k[1], k[2], k[3]])
    } else {
        None
    };

    let Some(body) = buf.get(offset..offset + len) else {
        return Ok(None);
    };
    let mut payload = body.to_vec();
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    Ok(Some((
        Frame {
            opcode,
            payload,
            masked,
        },
        offset + len,
    )))
}
