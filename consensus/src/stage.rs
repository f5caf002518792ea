//! Per-stage tally for one sub-round.
//!
//! `offer` never blocks. The first candidate to reach the quorum closes the
//! stage and resolves its completion with a certificate; the orchestrator
//! calls `abort` when its deadline expires first. Ballots arriving after the
//! stage closed are kept for audit but never tallied.

use std::collections::{HashMap, HashSet};

use palisade_types::{BlockHash, ValidatorAddress};
use tracing::debug;

use crate::ballot::Stage;
use crate::certificate::Certificate;
use crate::completion::{Completion, CompletionWaiter, StageOutcome};
use crate::error::ConsensusError;
use crate::pool::{BallotHandle, BallotPool};
use crate::round::RoundKey;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Tallied; no quorum yet.
    Accepted,
    /// Tallied, and this ballot completed the quorum.
    Certified(Certificate),
    /// The voter already has a ballot in this stage. The offered ballot is
    /// not retained.
    DuplicateVoter,
    /// The stage is closed. `audited` tells whether the ballot was kept in
    /// the audit record (first late ballot from that voter) or dropped.
    StageClosed { audited: bool },
}

impl OfferOutcome {
    /// Whether the stage now holds the offered handle.
    pub fn retains_ballot(&self) -> bool {
        match self {
            OfferOutcome::Accepted | OfferOutcome::Certified(_) => true,
            OfferOutcome::StageClosed { audited } => *audited,
            OfferOutcome::DuplicateVoter => false,
        }
    }
}

pub struct StageState {
    stage: Stage,
    key: RoundKey,
    quorum: usize,
    voted: HashSet<ValidatorAddress>,
    by_voter: HashMap<ValidatorAddress, BallotHandle>,
    /// Receipt order, for certificate construction.
    order: Vec<(ValidatorAddress, BallotHandle)>,
    tally: HashMap<BlockHash, usize>,
    late: HashMap<ValidatorAddress, BallotHandle>,
    completion: Completion,
    closed: bool,
}

impl StageState {
    pub fn new(stage: Stage, key: RoundKey, quorum: usize) -> Self {
        Self {
            stage,
            key,
            quorum,
            voted: HashSet::new(),
            by_voter: HashMap::new(),
            order: Vec::new(),
            tally: HashMap::new(),
            late: HashMap::new(),
            completion: Completion::new(),
            closed: false,
        }
    }

    /// Offer a ballot whose voter has already been recovered and checked
    /// against the validator set.
    pub fn offer(
        &mut self,
        voter: &ValidatorAddress,
        handle: BallotHandle,
        pool: &BallotPool,
    ) -> Result<OfferOutcome, ConsensusError> {
        let candidate = pool.get(handle)?.candidate();

        if self.voted.contains(voter) {
            return Ok(OfferOutcome::DuplicateVoter);
        }

        if self.closed {
            if self.late.contains_key(voter) {
                return Ok(OfferOutcome::StageClosed { audited: false });
            }
            self.late.insert(voter.clone(), handle);
            return Ok(OfferOutcome::StageClosed { audited: true });
        }

        self.voted.insert(voter.clone());
        self.by_voter.insert(voter.clone(), handle);
        self.order.push((voter.clone(), handle));

        let count = match self.tally.get_mut(&candidate) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                self.tally.insert(candidate, 1);
                1
            }
        };
        debug_assert_eq!(self.tally.values().sum::<usize>(), self.voted.len());

        if count < self.quorum {
            return Ok(OfferOutcome::Accepted);
        }

        let ballots = self
            .order
            .iter()
            .map(|(_, h)| pool.get(*h))
            .collect::<Result<Vec<_>, _>>()?;
        let certificate =
            Certificate::build(ballots.into_iter().filter(|b| b.candidate() == candidate))?;

        self.closed = true;
        self.completion
            .resolve(StageOutcome::Certified(certificate.clone()));
        debug!(
            round = %self.key,
            stage = %self.stage,
            candidate = %candidate,
            signers = certificate.signer_count(),
            "stage reached quorum"
        );
        Ok(OfferOutcome::Certified(certificate))
    }

    /// Deadline expired: close without a certificate and resolve "escalate".
    /// Returns `false` if the stage was already closed.
    pub fn abort(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.completion.resolve(StageOutcome::Escalate)
    }

    /// The height was settled elsewhere; release any waiter.
    pub fn cancel(&mut self) {
        self.closed = true;
        self.completion.resolve(StageOutcome::Cancelled);
    }

    /// Close with a certificate received from a peer.
    pub fn close_with(&mut self, certificate: Certificate) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.completion.resolve(StageOutcome::Certified(certificate))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn subscribe(&self) -> CompletionWaiter {
        self.completion.subscribe()
    }

    pub fn outcome(&self) -> Option<StageOutcome> {
        self.completion.outcome()
    }

    pub fn certificate(&self) -> Option<Certificate> {
        match self.completion.outcome() {
            Some(StageOutcome::Certified(cert)) => Some(cert),
            _ => None,
        }
    }

    pub fn tally_for(&self, candidate: &BlockHash) -> usize {
        self.tally.get(candidate).copied().unwrap_or(0)
    }

    pub fn tally(&self) -> &HashMap<BlockHash, usize> {
        &self.tally
    }

    /// Tally including late ballots held for audit.
    pub fn observed_tally(&self, pool: &BallotPool) -> HashMap<BlockHash, usize> {
        let mut observed = self.tally.clone();
        for handle in self.late.values() {
            if let Ok(ballot) = pool.get(*handle) {
                *observed.entry(ballot.candidate()).or_default() += 1;
            }
        }
        observed
    }

    pub fn voted(&self) -> &HashSet<ValidatorAddress> {
        &self.voted
    }

    pub fn has_voted(&self, voter: &ValidatorAddress) -> bool {
        self.voted.contains(voter)
    }

    pub fn ballot_of(&self, voter: &ValidatorAddress) -> Option<BallotHandle> {
        self.by_voter
            .get(voter)
            .or_else(|| self.late.get(voter))
            .copied()
    }

    pub fn late_count(&self) -> usize {
        self.late.len()
    }

    /// Handles of tallied and audited ballots whose voter is not in `known`.
    pub fn missing(&self, known: &HashSet<ValidatorAddress>) -> Vec<BallotHandle> {
        self.order
            .iter()
            .filter(|(voter, _)| !known.contains(voter))
            .map(|(_, h)| *h)
            .chain(
                self.late
                    .iter()
                    .filter(|(voter, _)| !known.contains(*voter))
                    .map(|(_, h)| *h),
            )
            .collect()
    }

    /// Every handle this stage holds.
    pub fn handles(&self) -> impl Iterator<Item = BallotHandle> + '_ {
        self.order
            .iter()
            .map(|(_, h)| *h)
            .chain(self.late.values().copied())
    }
}
