//! Ballots for rounds the session has not reached yet.
//!
//! Peers may race ahead, so ballots for a later round key are held instead
//! of dropped, and replayed once the session's current round reaches that
//! key. The cache is bounded by the number of distinct round keys (oldest
//! inserted key evicted first) and by ballots per key.

use std::collections::{HashMap, VecDeque};

use palisade_types::ValidatorAddress;
use tracing::debug;

use crate::pool::BallotHandle;
use crate::round::RoundKey;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CacheInsert {
    /// Whether the offered ballot was stored. If not, the caller still owns it.
    pub stored: bool,
    /// Handles dropped by eviction; the caller returns them to the pool.
    pub evicted: Vec<BallotHandle>,
}

pub struct FutureRoundCache {
    rounds: HashMap<RoundKey, Vec<(ValidatorAddress, BallotHandle)>>,
    /// Insertion order of round keys, oldest first.
    order: VecDeque<RoundKey>,
    max_rounds: usize,
    max_ballots_per_round: usize,
}

impl FutureRoundCache {
    pub fn new(max_rounds: usize, max_ballots_per_round: usize) -> Self {
        Self {
            rounds: HashMap::new(),
            order: VecDeque::new(),
            max_rounds,
            max_ballots_per_round,
        }
    }

    pub fn insert(
        &mut self,
        key: RoundKey,
        voter: ValidatorAddress,
        handle: BallotHandle,
    ) -> CacheInsert {
        let mut result = CacheInsert::default();

        if let Some(entry) = self.rounds.get_mut(&key) {
            if entry.len() >= self.max_ballots_per_round {
                return result;
            }
            entry.push((voter, handle));
            result.stored = true;
            return result;
        }

        if self.max_rounds == 0 || self.max_ballots_per_round == 0 {
            return result;
        }

        while self.rounds.len() >= self.max_rounds {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(ballots) = self.rounds.remove(&oldest) {
                debug!(round = %oldest, ballots = ballots.len(), "evicting cached future round");
                result.evicted.extend(ballots.into_iter().map(|(_, h)| h));
            }
        }

        self.rounds.insert(key, vec![(voter, handle)]);
        self.order.push_back(key);
        result.stored = true;
        result
    }

    /// Remove and return the ballots cached for `key`, in arrival order.
    pub fn take(&mut self, key: &RoundKey) -> Vec<(ValidatorAddress, BallotHandle)> {
        match self.rounds.remove(key) {
            Some(ballots) => {
                self.order.retain(|k| k != key);
                ballots
            }
            None => Vec::new(),
        }
    }

    /// Remove every cached round ordered before `current`; returns their
    /// handles for release.
    pub fn take_older_than(&mut self, current: &RoundKey) -> Vec<BallotHandle> {
        let stale: Vec<RoundKey> = self
            .order
            .iter()
            .filter(|k| *k < current)
            .copied()
            .collect();
        let mut handles = Vec::new();
        for key in stale {
            handles.extend(self.take(&key).into_iter().map(|(_, h)| h));
        }
        handles
    }

    /// Empty the cache; returns every handle for release.
    pub fn drain(&mut self) -> Vec<BallotHandle> {
        self.order.clear();
        self.rounds
            .drain()
            .flat_map(|(_, ballots)| ballots.into_iter().map(|(_, h)| h))
            .collect()
    }

    pub fn contains(&self, key: &RoundKey) -> bool {
        self.rounds.contains_key(key)
    }

    /// Number of cached round keys.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn ballot_count(&self) -> usize {
        self.rounds.values().map(Vec::len).sum()
    }
}
