//! Control messages multiplexed with binary signals on one channel.
//!
//! A control message is a JSON object whose reserved `_ctrl` field names the
//! kind. Any inbound payload containing the literal `"_ctrl"` key is treated
//! as control and never handed to the signal decoder.

use crate::signal::{MalformedSignal, Signal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Literal marker that classifies a payload as control.
pub const CTRL_MARKER: &[u8] = b"\"_ctrl\"";

/// Out-of-band messages exchanged between an agent and its hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_ctrl", rename_all = "snake_case")]
pub enum Control {
    /// Agent → hub: announce name and hash.
    Register {
        /// Logical agent name.
        agent_id: String,
        /// Routable hash.
        neural_hash: String,
    },
    /// Hub → agent: registration accepted, with the current peer directory.
    Registered {
        /// Peer name → hash.
        #[serde(default)]
        peers: HashMap<String, String>,
    },
    /// Hub → agent: another agent registered.
    PeerJoined {
        /// Peer name.
        agent_id: String,
        /// Peer hash.
        neural_hash: String,
    },
    /// Hub → agent: another agent disconnected.
    PeerLeft {
        /// Peer name.
        agent_id: String,
        /// Peer hash, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        neural_hash: Option<String>,
    },
    /// Application-level heartbeat request.
    Ping,
    /// Application-level heartbeat reply.
    Pong,
    /// Hub → agent: request refused.
    Error {
        /// Human-readable reason.
        reason: String,
    },
    /// Any kind this build does not know; ignored by receivers.
    #[serde(other)]
    Other,
}

/// Errors raised while classifying an inbound payload.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The payload looked like control but is not valid control JSON.
    #[error("invalid control message: {0}")]
    Control(#[from] serde_json::Error),
    /// The payload is not a valid binary signal.
    #[error("malformed signal: {0}")]
    Signal(#[from] MalformedSignal),
}

/// A classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A control message.
    Control(Control),
    /// A data signal.
    Signal(Signal),
}

/// Returns `true` if `data` contains the literal `"_ctrl"` key.
#[must_use]
pub fn is_control(data: &[u8]) -> bool {
    data.windows(CTRL_MARKER.len()).any(|w| w == CTRL_MARKER)
}

impl Control {
    /// Serializes this message to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses control JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not a JSON object with a `_ctrl` field.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Wire name of this kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Registered { .. } => "registered",
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
            Self::Other => "other",
        }
    }
}

impl Envelope {
    /// Classifies `data` as control or signal and decodes it.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if the selected decoder rejects the bytes.
    pub fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        if is_control(data) {
            Ok(Self::Control(Control::decode(data)?))
        } else {
            Ok(Self::Signal(Signal::decode(data)?))
        }
    }
}
