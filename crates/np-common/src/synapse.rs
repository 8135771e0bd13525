//! Adaptive per-edge strength tracking.

use chrono::{DateTime, Utc};
use std::fmt;

/// Strength increment unit.
pub const LEARNING_RATE: f64 = 0.05;
/// Lower strength bound.
pub const MIN_STRENGTH: f64 = 0.1;
/// Upper strength bound.
pub const MAX_STRENGTH: f64 = 2.0;
/// Strength of a freshly created synapse.
pub const INITIAL_STRENGTH: f64 = 1.0;

/// Outcome history of transmissions from one identity to another.
///
/// Strength only changes through [`Synapse::reinforce`] and
/// [`Synapse::weaken`] and always stays in `[MIN_STRENGTH, MAX_STRENGTH]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Synapse {
    /// Owning agent hash.
    pub source: String,
    /// Target hash or name.
    pub target: String,
    strength: f64,
    transmission_count: u64,
    success_count: u64,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl Synapse {
    /// Creates a synapse at [`INITIAL_STRENGTH`].
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            target: target.into(),
            strength: INITIAL_STRENGTH,
            transmission_count: 0,
            success_count: 0,
            created_at: now,
            last_used: now,
        }
    }

    /// Records a successful transmission.
    pub fn reinforce(&mut self) {
        let delta = LEARNING_RATE * (1.0 + self.success_rate());
        self.strength = (self.strength + delta).min(MAX_STRENGTH);
        self.success_count += 1;
        self.transmission_count += 1;
        self.last_used = Utc::now();
    }

    /// Records a failed transmission.
    pub fn weaken(&mut self) {
        self.strength = (self.strength - LEARNING_RATE * 2.0).max(MIN_STRENGTH);
        self.transmission_count += 1;
        self.last_used = Utc::now();
    }

    /// Successes over attempts; 0 before the first attempt.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.transmission_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.transmission_count as f64
    }

    /// Current strength.
    #[must_use]
    pub const fn strength(&self) -> f64 {
        self.strength
    }

    /// Total attempts recorded.
    #[must_use]
    pub const fn transmission_count(&self) -> u64 {
        self.transmission_count
    }

    /// Successful attempts recorded.
    #[must_use]
    pub const fn success_count(&self) -> u64 {
        self.success_count
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last recorded attempt.
    #[must_use]
    pub const fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    /// `true` once strength reaches 1.2.
    #[must_use]
    pub fn is_strong(&self) -> bool {
        self.strength >= 1.2
    }

    /// `true` while strength is at or below 0.3.
    #[must_use]
    pub fn is_weak(&self) -> bool {
        self.strength <= 0.3
    }
}

impl fmt::Display for Synapse {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bar = "#".repeat((self.strength * 5.0) as usize);
        write!(
            f,
            "synapse {}->{} strength={:.2} [{:<10}] success_rate={:.0}% tx={}",
            self.source.get(..6).unwrap_or(&self.source),
            self.target.get(..6).unwrap_or(&self.target),
            self.strength,
            bar,
            self.success_rate() * 100.0,
            self.transmission_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinforce_then_weaken_moves_strength() {
        let mut syn = Synapse::new("src", "tgt");
        assert!((syn.strength() - 1.0).abs() < f64::EPSILON);
        syn.reinforce();
        assert!(syn.strength() > 1.0);
        let old = syn.strength();
        syn.weaken();
        assert!(syn.strength() < old);
    }

    #[test]
    fn first_reinforce_uses_zero_success_rate() {
        let mut syn = Synapse::new("src", "tgt");
        syn.reinforce();
        assert!((syn.strength() - 1.05).abs() < 1e-9);
        syn.reinforce();
        assert!((syn.strength() - 1.15).abs() < 1e-9);
    }

    #[test]
    fn counters_track_outcomes() {
        let mut syn = Synapse::new("src", "tgt");
        assert!(syn.success_rate().abs() < f64::EPSILON);
        syn.reinforce();
        syn.weaken();
        syn.weaken();
        assert_eq!(syn.transmission_count(), 3);
        assert_eq!(syn.success_count(), 1);
        assert!((syn.success_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn strength_stays_within_bounds() {
        let mut syn = Synapse::new("src", "tgt");
        for _ in 0..100 {
            syn.reinforce();
            assert!(syn.strength() <= MAX_STRENGTH);
        }
        assert!((syn.strength() - MAX_STRENGTH).abs() < f64::EPSILON);
        assert!(syn.is_strong());
        for _ in 0..100 {
            syn.weaken();
            assert!(syn.strength() >= MIN_STRENGTH);
        }
        assert!((syn.strength() - MIN_STRENGTH).abs() < f64::EPSILON);
        assert!(syn.is_weak());
    }

    #[test]
    fn mixed_sequence_never_leaves_bounds() {
        let mut syn = Synapse::new("src", "tgt");
        for i in 0..500u32 {
            if i % 3 == 0 || i % 7 == 0 {
                syn.weaken();
            } else {
                syn.reinforce();
            }
            assert!((MIN_STRENGTH..=MAX_STRENGTH).contains(&syn.strength()));
        }
    }
}
