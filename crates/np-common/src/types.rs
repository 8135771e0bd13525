//! Core type definitions and wire constants for neural signals.

use rand::RngCore;
use std::fmt;

/// Two-byte marker that opens every encoded signal.
pub const MAGIC: &[u8; 2] = b"NP";

/// Current signal wire-format version.
/// Bump this on breaking layout changes.
pub const VERSION: u8 = 1;

/// Size of the fixed signal header in bytes.
///
/// magic(2) + version(1) + type(1) + timestamp(8) + msg id(16)
/// + source len(1) + target len(1) + payload len(4)
pub const HEADER_LEN: usize = 34;

/// Length of a message id on the wire.
pub const MESSAGE_ID_LEN: usize = 16;

/// Default time-to-live assigned to new and decoded signals.
pub const DEFAULT_TTL: u32 = 10;

/// The six kinds of signal an agent can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SignalType {
    /// Activation: a request that something be done.
    ActionPotential = 0,
    /// Reward: an operation completed successfully.
    Dopamine = 1,
    /// Stabilisation.
    Serotonin = 2,
    /// Alert or opportunity.
    Norepinephrine = 3,
    /// Inhibition.
    Gaba = 4,
    /// Excitation / learning.
    Glutamate = 5,
}

impl SignalType {
    /// All signal kinds in wire order.
    pub const ALL: [Self; 6] = [
        Self::ActionPotential,
        Self::Dopamine,
        Self::Serotonin,
        Self::Norepinephrine,
        Self::Gaba,
        Self::Glutamate,
    ];

    /// Maps a wire byte to a signal kind.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ActionPotential),
            1 => Some(Self::Dopamine),
            2 => Some(Self::Serotonin),
            3 => Some(Self::Norepinephrine),
            4 => Some(Self::Gaba),
            5 => Some(Self::Glutamate),
            _ => None,
        }
    }

    /// Upper-case wire name, e.g. `ACTION_POTENTIAL`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ActionPotential => "ACTION_POTENTIAL",
            Self::Dopamine => "DOPAMINE",
            Self::Serotonin => "SEROTONIN",
            Self::Norepinephrine => "NOREPINEPHRINE",
            Self::Gaba => "GABA",
            Self::Glutamate => "GLUTAMATE",
        }
    }

    /// Short human description of what the kind conveys.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ActionPotential => "activation",
            Self::Dopamine => "reward",
            Self::Serotonin => "stabilisation",
            Self::Norepinephrine => "alert/opportunity",
            Self::Gaba => "inhibition",
            Self::Glutamate => "excitation/learning",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.name() == upper)
            .ok_or_else(|| format!("unknown signal type: {s}"))
    }
}

/// A 16-byte message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId(pub [u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Generates a random message id.
    #[must_use]
    pub fn random() -> Self {
        let mut id = [0u8; MESSAGE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Builds an id from a string, truncating or zero-padding it to 16 bytes.
    ///
    /// Hex strings are right-padded with `'0'` to 32 digits (or cut to 32)
    /// and decoded; anything else contributes its raw UTF-8 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use np_common::MessageId;
    /// let id = MessageId::from_hex_lossy("ab");
    /// assert_eq!(id.0[0], 0xab);
    /// assert_eq!(id.0[1..], [0u8; 15]);
    /// ```
    #[must_use]
    pub fn from_hex_lossy(id: &str) -> Self {
        let mut out = [0u8; MESSAGE_ID_LEN];
        if id.bytes().all(|b| b.is_ascii_hexdigit()) {
            let mut digits: String = id.chars().take(MESSAGE_ID_LEN * 2).collect();
            while digits.len() < MESSAGE_ID_LEN * 2 {
                digits.push('0');
            }
            if hex::decode_to_slice(&digits, &mut out).is_ok() {
                return Self(out);
            }
        }
        let raw = id.as_bytes();
        let n = raw.len().min(MESSAGE_ID_LEN);
        out[..n].copy_from_slice(&raw[..n]);
        Self(out)
    }

    /// Lower-case hex rendering (32 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Current Unix time in fractional seconds.
///
/// Returns 0.0 if the system clock is before the Unix epoch.
#[must_use]
pub fn unix_now_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
