//! Bifurcation detection: a validator signing two different candidates for
//! the same voting slot.
//!
//! The slot is `(voter, height, round_index, packing_index)`, so conflicts
//! are caught across stages and sub-rounds. Empty-block ballots never
//! conflict; a validator may fall back to empty after voting for a block.
//!
//! The detector keeps its own copy of the first non-empty ballot per slot,
//! at most `slots_per_voter` slots per voter. When a voter is at the limit,
//! the highest slot gives way to a lower one, so ballots for far-future
//! rounds cannot push the current slot out. Slots below the floor set by
//! `advance_floor` are neither tracked nor checked.

use std::collections::{BTreeMap, HashMap};

use palisade_types::{BlockHash, ValidatorAddress};
use tracing::{trace, warn};

use crate::ballot::Ballot;

/// Both conflicting ballots, as signed by the voter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BifurcationEvidence {
    pub voter: ValidatorAddress,
    pub first: Ballot,
    pub second: Ballot,
}

/// `(height, round_index, packing_index)`.
type Slot = (u64, u32, u16);

struct FirstVote {
    ballot: Ballot,
    reported: bool,
}

pub struct BifurcationDetector {
    first_votes: HashMap<ValidatorAddress, BTreeMap<Slot, FirstVote>>,
    floor: Slot,
    slots_per_voter: usize,
    evidence: Vec<BifurcationEvidence>,
}

impl BifurcationDetector {
    pub fn new(slots_per_voter: usize) -> Self {
        Self {
            first_votes: HashMap::new(),
            floor: (0, 0, 0),
            slots_per_voter: slots_per_voter.max(1),
            evidence: Vec::new(),
        }
    }

    /// Record a ballot. Returns evidence the first time the voter is seen
    /// with a second candidate for the same slot.
    pub fn observe(
        &mut self,
        voter: &ValidatorAddress,
        ballot: &Ballot,
    ) -> Option<BifurcationEvidence> {
        let body = ballot.body();
        if body.candidate.is_empty_block() {
            return None;
        }
        let slot = (body.height, body.round_index, body.packing_index);
        if slot < self.floor {
            return None;
        }

        let votes = self.first_votes.entry(voter.clone()).or_default();
        let Some(first) = votes.get_mut(&slot) else {
            if votes.len() >= self.slots_per_voter {
                let highest = votes.keys().next_back().copied()?;
                if slot > highest {
                    trace!(voter = %voter, round = body.round_index, "slot above tracking window");
                    return None;
                }
                votes.remove(&highest);
            }
            votes.insert(
                slot,
                FirstVote {
                    ballot: ballot.clone(),
                    reported: false,
                },
            );
            return None;
        };

        if first.ballot.candidate() == body.candidate || first.reported {
            return None;
        }
        first.reported = true;

        let evidence = BifurcationEvidence {
            voter: voter.clone(),
            first: first.ballot.clone(),
            second: ballot.clone(),
        };
        warn!(
            voter = %voter,
            height = body.height,
            round = body.round_index,
            packing = body.packing_index,
            first = %evidence.first.candidate(),
            second = %evidence.second.candidate(),
            "bifurcation detected"
        );
        self.evidence.push(evidence.clone());
        Some(evidence)
    }

    /// Forget slots below `(height, round_index, packing_index)` and ignore
    /// them from now on.
    pub fn advance_floor(&mut self, height: u64, round_index: u32, packing_index: u16) {
        let floor = (height, round_index, packing_index);
        if floor <= self.floor {
            return;
        }
        self.floor = floor;
        for votes in self.first_votes.values_mut() {
            *votes = votes.split_off(&floor);
        }
        self.first_votes.retain(|_, votes| !votes.is_empty());
    }

    pub fn evidence(&self) -> &[BifurcationEvidence] {
        &self.evidence
    }

    /// Slots currently tracked, over all voters.
    pub fn tracked(&self) -> usize {
        self.first_votes.values().map(BTreeMap::len).sum()
    }
}
