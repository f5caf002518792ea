//! One round / sub-round: the two stages plus the "who has voted" record.

use std::collections::HashSet;
use std::fmt;

use palisade_types::ValidatorAddress;

use crate::ballot::Stage;
use crate::error::ConsensusError;
use crate::pool::{BallotHandle, BallotPool};
use crate::stage::{OfferOutcome, StageState};

/// Position of a sub-round within a height. Ordered by round, then packing
/// slot, then sub-round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoundKey {
    pub round_index: u32,
    pub packing_index: u16,
    pub sub_round: u32,
}

impl RoundKey {
    pub fn first(round_index: u32, packing_index: u16) -> Self {
        Self {
            round_index,
            packing_index,
            sub_round: 1,
        }
    }

    /// The escalation successor: same slot, next sub-round.
    pub fn next_sub_round(&self) -> Self {
        Self {
            sub_round: self.sub_round.saturating_add(1),
            ..*self
        }
    }

    pub fn same_slot(&self, other: &RoundKey) -> bool {
        self.round_index == other.round_index && self.packing_index == other.packing_index
    }
}

impl fmt::Display for RoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.round_index, self.packing_index, self.sub_round
        )
    }
}

pub struct RoundState {
    key: RoundKey,
    start_time: u32,
    stage1: StageState,
    stage2: StageState,
    voted_this_round: HashSet<ValidatorAddress>,
}

impl RoundState {
    pub fn new(key: RoundKey, start_time: u32, quorum: usize) -> Self {
        Self {
            key,
            start_time,
            stage1: StageState::new(Stage::One, key, quorum),
            stage2: StageState::new(Stage::Two, key, quorum),
            voted_this_round: HashSet::new(),
        }
    }

    pub fn key(&self) -> RoundKey {
        self.key
    }

    pub fn start_time(&self) -> u32 {
        self.start_time
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        match stage {
            Stage::One => &self.stage1,
            Stage::Two => &self.stage2,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        match stage {
            Stage::One => &mut self.stage1,
            Stage::Two => &mut self.stage2,
        }
    }

    /// Route a ballot to its stage. The ballot must belong to this round.
    pub fn offer(
        &mut self,
        voter: &ValidatorAddress,
        handle: BallotHandle,
        pool: &BallotPool,
    ) -> Result<OfferOutcome, ConsensusError> {
        let body = *pool.get(handle)?.body();
        if body.round_key() != self.key {
            return Err(ConsensusError::MalformedBallot(format!(
                "ballot for round {} offered to round {}",
                body.round_key(),
                self.key
            )));
        }
        if body.round_start_time != self.start_time {
            return Err(ConsensusError::MalformedBallot(format!(
                "round start time {} does not match {}",
                body.round_start_time, self.start_time
            )));
        }

        let outcome = self.stage_mut(body.stage).offer(voter, handle, pool)?;
        if outcome.retains_ballot() {
            self.voted_this_round.insert(voter.clone());
        }
        Ok(outcome)
    }

    /// Validators with any ballot in this round, across both stages.
    pub fn voted_this_round(&self) -> &HashSet<ValidatorAddress> {
        &self.voted_this_round
    }

    pub fn cancel(&mut self) {
        self.stage1.cancel();
        self.stage2.cancel();
    }

    pub fn handles(&self) -> impl Iterator<Item = BallotHandle> + '_ {
        self.stage1.handles().chain(self.stage2.handles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::{Ballot, BallotBody};
    use crate::scheme::{BallotSigner, KeyPairSigner};
    use palisade_types::BlockHash;

    fn ballot(signer: &KeyPairSigner, key: RoundKey, stage: Stage, start: u32) -> Ballot {
        Ballot::sign(
            BallotBody {
                height: 1,
                round_index: key.round_index,
                packing_index: key.packing_index,
                round_start_time: start,
                sub_round: key.sub_round,
                stage,
                candidate: BlockHash::new([3; 32]),
            },
            signer,
        )
    }

    #[test]
    fn keys_order_by_round_then_slot_then_sub_round() {
        let a = RoundKey::first(4, 0);
        let b = a.next_sub_round();
        let c = RoundKey::first(4, 1);
        let d = RoundKey::first(5, 0);
        assert!(a < b && b < c && c < d);
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
        assert_eq!(b.to_string(), "4.0.2");
    }

    #[test]
    fn routes_by_stage_and_records_voters() {
        let signer = KeyPairSigner::from_seed(&[1; 32]);
        let key = RoundKey::first(1, 0);
        let mut pool = BallotPool::new(8);
        let mut round = RoundState::new(key, 100, 3);

        let h1 = pool.insert(ballot(&signer, key, Stage::One, 100)).unwrap();
        let h2 = pool.insert(ballot(&signer, key, Stage::Two, 100)).unwrap();
        round.offer(signer.address(), h1, &pool).unwrap();
        round.offer(signer.address(), h2, &pool).unwrap();

        assert!(round.stage(Stage::One).has_voted(signer.address()));
        assert!(round.stage(Stage::Two).has_voted(signer.address()));
        assert_eq!(round.voted_this_round().len(), 1);
        assert_eq!(round.handles().count(), 2);
    }

    #[test]
    fn rejects_mismatched_start_time_and_round() {
        let signer = KeyPairSigner::from_seed(&[1; 32]);
        let key = RoundKey::first(1, 0);
        let mut pool = BallotPool::new(8);
        let mut round = RoundState::new(key, 100, 3);

        let wrong_time = pool.insert(ballot(&signer, key, Stage::One, 99)).unwrap();
        assert!(round.offer(signer.address(), wrong_time, &pool).is_err());

        let wrong_round = pool
            .insert(ballot(&signer, key.next_sub_round(), Stage::One, 100))
            .unwrap();
        assert!(round.offer(signer.address(), wrong_round, &pool).is_err());
        assert!(round.voted_this_round().is_empty());
    }
}
