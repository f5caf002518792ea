//! Bounded duplicate suppression for overlay and consensus traffic.
//!
//! Messages are keyed on an 8-byte truncated Blake2b digest. Memory is bounded
//! by a two-buffer rotation: once the primary set passes its high-water mark,
//! new digests are also written to a shadow set, and once the primary passes
//! the hard cap it is replaced by the shadow. The most recent digests therefore
//! survive every rotation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Default high-water mark at which the shadow set starts filling.
pub const DEFAULT_HIGH_WATER_MARK: usize = 50_000;

/// Default hard cap at which the primary set is rotated out.
pub const DEFAULT_HARD_CAP: usize = 60_000;

/// Tuning for [`DuplicateSuppressor`] (`[dedup]` in the node config).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_hard_cap() -> usize {
    DEFAULT_HARD_CAP
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            hard_cap: DEFAULT_HARD_CAP,
        }
    }
}

/// Two-buffer set of recently seen message digests.
pub struct DuplicateSuppressor {
    primary: HashSet<u64>,
    shadow: HashSet<u64>,
    high_water_mark: usize,
    hard_cap: usize,
    rotations: u64,
}

impl DuplicateSuppressor {
    /// Create a suppressor. A hard cap below the high-water mark is raised to it.
    pub fn new(high_water_mark: usize, hard_cap: usize) -> Self {
        let hard_cap = hard_cap.max(high_water_mark);
        Self {
            primary: HashSet::with_capacity(hard_cap + 1),
            shadow: HashSet::new(),
            high_water_mark,
            hard_cap,
            rotations: 0,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.high_water_mark, config.hard_cap)
    }

    /// Record `digest` and report whether it had already been seen.
    pub fn check_and_mark(&mut self, digest: [u8; 8]) -> bool {
        let key = u64::from_be_bytes(digest);
        if self.primary.contains(&key) {
            return true;
        }

        self.primary.insert(key);
        if self.primary.len() > self.high_water_mark {
            self.shadow.insert(key);
        }
        if self.primary.len() > self.hard_cap {
            self.primary = std::mem::take(&mut self.shadow);
            self.rotations += 1;
            tracing::debug!(
                retained = self.primary.len(),
                rotations = self.rotations,
                "rotated duplicate suppressor"
            );
        }
        false
    }

    /// Digest raw message bytes and check them in one step.
    pub fn check_message(&mut self, bytes: &[u8]) -> bool {
        self.check_and_mark(Self::digest(bytes))
    }

    /// Truncated Blake2b digest used as the suppression key.
    pub fn digest(bytes: &[u8]) -> [u8; 8] {
        palisade_crypto::short_digest(bytes)
    }

    /// Number of digests currently remembered.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    pub fn shadow_len(&self) -> usize {
        self.shadow.len()
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }
}

impl Default for DuplicateSuppressor {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(n: u64) -> [u8; 8] {
        n.to_be_bytes()
    }

    #[test]
    fn first_sighting_is_not_duplicate() {
        let mut dedup = DuplicateSuppressor::new(10, 20);
        assert!(!dedup.check_and_mark(digest(1)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn second_sighting_is_duplicate() {
        let mut dedup = DuplicateSuppressor::new(10, 20);
        dedup.check_and_mark(digest(7));
        assert!(dedup.check_and_mark(digest(7)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn shadow_fills_only_past_high_water_mark() {
        let mut dedup = DuplicateSuppressor::new(5, 10);
        for n in 0..5 {
            dedup.check_and_mark(digest(n));
        }
        assert_eq!(dedup.shadow_len(), 0);

        dedup.check_and_mark(digest(5));
        assert_eq!(dedup.shadow_len(), 1);
    }

    #[test]
    fn recent_digests_survive_at_the_cap() {
        let mut dedup = DuplicateSuppressor::new(1000, 1200);
        for n in 0..1200 {
            assert!(!dedup.check_and_mark(digest(n)));
        }
        assert_eq!(dedup.rotations(), 0);

        for n in 1000..1200 {
            assert!(dedup.check_and_mark(digest(n)), "digest {n} forgotten");
        }
    }

    #[test]
    fn rotation_keeps_recent_and_forgets_old() {
        let mut dedup = DuplicateSuppressor::new(1000, 1200);
        for n in 0..1201 {
            dedup.check_and_mark(digest(n));
        }
        assert_eq!(dedup.rotations(), 1);
        assert_eq!(dedup.len(), 201);
        assert_eq!(dedup.shadow_len(), 0);

        for n in 1001..1201 {
            assert!(dedup.check_and_mark(digest(n)), "digest {n} forgotten");
        }
        assert!(!dedup.check_and_mark(digest(0)));
    }

    #[test]
    fn memory_stays_bounded() {
        let mut dedup = DuplicateSuppressor::new(100, 150);
        for n in 0..10_000 {
            dedup.check_and_mark(digest(n));
            assert!(dedup.len() <= 150);
        }
    }

    #[test]
    fn hard_cap_is_never_below_high_water_mark() {
        let mut dedup = DuplicateSuppressor::new(10, 3);
        for n in 0..10 {
            dedup.check_and_mark(digest(n));
        }
        assert_eq!(dedup.rotations(), 0);
    }

    #[test]
    fn message_digest_is_stable() {
        let mut dedup = DuplicateSuppressor::default();
        assert!(!dedup.check_message(b"identity"));
        assert!(dedup.check_message(b"identity"));
        assert!(!dedup.check_message(b"share"));
    }

    #[test]
    fn config_defaults_match_constants() {
        let config = DedupConfig::default();
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert_eq!(config.hard_cap, DEFAULT_HARD_CAP);
    }
}
