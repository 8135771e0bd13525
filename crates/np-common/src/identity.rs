//! Agent identities and their routable hashes.

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters in a neural hash.
pub const HASH_LEN: usize = 16;

/// A named agent and the hash other agents route to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Logical agent name, e.g. `"ventas"`.
    pub agent_id: String,
    /// 16 hex characters derived from the name, the time and a random nonce.
    pub neural_hash: String,
    /// When the identity was generated.
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Generates a fresh identity for `agent_id`.
    ///
    /// The hash is the first 16 hex characters of
    /// `SHA-256(agent_id ‖ ":" ‖ time ‖ ":" ‖ nonce)`. Uniqueness is
    /// best-effort; no registry is consulted.
    ///
    /// # Examples
    ///
    /// ```
    /// use np_common::Identity;
    /// let id = Identity::generate("soporte");
    /// assert_eq!(id.neural_hash.len(), 16);
    /// ```
    #[must_use]
    pub fn generate(agent_id: &str) -> Self {
        let created_at = Utc::now();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(agent_id.as_bytes());
        hasher.update(b":");
        hasher.update(created_at.timestamp_micros().to_be_bytes());
        hasher.update(b":");
        hasher.update(nonce);
        let digest = hasher.finalize();

        let mut neural_hash = hex::encode(digest);
        neural_hash.truncate(HASH_LEN);
        Self {
            agent_id: agent_id.to_owned(),
            neural_hash,
            created_at,
        }
    }

    /// First six hash characters, used in log lines.
    #[must_use]
    pub fn short_hash(&self) -> &str {
        &self.neural_hash[..self.neural_hash.len().min(6)]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}#{}]", self.agent_id, self.short_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let id = Identity::generate("test");
        assert_eq!(id.neural_hash.len(), HASH_LEN);
        assert!(id.neural_hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn same_name_yields_different_hashes() {
        let a = Identity::generate("test");
        let b = Identity::generate("test");
        assert_ne!(a.neural_hash, b.neural_hash);
        assert_eq!(a.agent_id, b.agent_id);
    }

    #[test]
    fn display_shows_name_and_short_hash() {
        let id = Identity::generate("ventas");
        let s = id.to_string();
        assert!(s.starts_with("[ventas#"));
        assert_eq!(s.len(), "[ventas#".len() + 6 + 1);
    }
}
