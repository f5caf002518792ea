//! Voting session for one height.
//!
//! The session owns the current round, the future-round cache, the ballot
//! pool and the bifurcation detector. `receive` is synchronous and never
//! waits; the orchestrator awaits stage completions separately and calls
//! `on_stage_timeout` when a deadline passes.
//!
//! ```text
//! STAGE1_OPEN -> STAGE1_CLOSED(cert) -> STAGE2_OPEN -> STAGE2_CLOSED(cert) -> CONFIRMED
//!      \_______________ timeout, no quorum ______________/
//!                              |
//!                   sub_round + 1, STAGE1_OPEN
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use palisade_types::{BlockHash, ValidatorAddress};
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::ballot::{Ballot, BallotBody, Stage};
use crate::bifurcation::{BifurcationDetector, BifurcationEvidence};
use crate::certificate::Certificate;
use crate::completion::{CompletionWaiter, StageOutcome};
use crate::context::ConsensusContext;
use crate::error::ConsensusError;
use crate::future_cache::FutureRoundCache;
use crate::pool::{BallotHandle, BallotPool};
use crate::round::{RoundKey, RoundState};
use crate::scheme::{BallotSigner, SignatureScheme};
use crate::stage::OfferOutcome;

/// Sub-rounds whose voter sets are kept for diagnostics.
const MAX_PREVIOUS_ROUNDS: usize = 16;

/// What the scheduler hands the voting core for each round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundInfo {
    pub height: u64,
    pub round_index: u32,
    pub packing_index: u16,
    pub round_start_time: u32,
    /// The producer's proposal, if already known.
    pub candidate: Option<BlockHash>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Confirmed {
        hash: BlockHash,
        certificate: Certificate,
    },
    ConfirmedEmpty {
        certificate: Certificate,
    },
    Bifurcated(BifurcationEvidence),
}

impl SessionOutcome {
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, SessionOutcome::Bifurcated(_))
    }
}

/// Transitions the owner of the session has to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A stage certificate was built locally (`local`) or accepted from a peer.
    Certified { certificate: Certificate, local: bool },
    Escalated { from: RoundKey, to: RoundKey },
    Confirmed(SessionOutcome),
    Bifurcation(BifurcationEvidence),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Accepted,
    /// Accepted, and it completed the quorum of the given stage.
    Certified(Stage),
    /// Voter already counted in that stage.
    Duplicate,
    /// Stage was closed; kept for audit only.
    Audited,
    /// Round already left behind, or the height is settled.
    Stale,
    /// Held for a round the session has not reached.
    Cached,
    /// Future round, but the cache refused it.
    Dropped,
}

pub struct VotingSession {
    height: u64,
    validators: Vec<ValidatorAddress>,
    members: HashSet<ValidatorAddress>,
    quorum: usize,
    scheme: Arc<dyn SignatureScheme>,
    pool: BallotPool,
    current: RoundState,
    future: FutureRoundCache,
    detector: BifurcationDetector,
    previous: VecDeque<(RoundKey, HashSet<ValidatorAddress>)>,
    proposal: watch::Sender<Option<BlockHash>>,
    outcome: Option<SessionOutcome>,
    delivered: bool,
    cancelled: bool,
    events: Vec<SessionEvent>,
}

impl VotingSession {
    /// Start a session, reading the validator set for `info.height` from the
    /// context.
    pub fn new(ctx: &ConsensusContext, info: RoundInfo) -> Result<Self, ConsensusError> {
        let validators = ctx.validators.current_set(info.height);
        let quorum = ctx.validators.quorum_size(info.height);
        Self::with_validators(ctx, info, validators, quorum)
    }

    /// Start a session with an explicit validator set and quorum.
    ///
    /// Requires `2 * quorum > validators.len()`; without it two candidates
    /// could both certify.
    pub fn with_validators(
        ctx: &ConsensusContext,
        info: RoundInfo,
        validators: Vec<ValidatorAddress>,
        quorum: usize,
    ) -> Result<Self, ConsensusError> {
        let n = validators.len();
        if quorum == 0 || quorum > n || 2 * quorum <= n {
            return Err(ConsensusError::QuorumPrecondition {
                quorum,
                validators: n,
            });
        }

        let key = RoundKey::first(info.round_index, info.packing_index);
        let (proposal, _) = watch::channel(info.candidate);
        let members = validators.iter().cloned().collect();
        let mut detector =
            BifurcationDetector::new(ctx.config.future_round_capacity.saturating_add(1));
        detector.advance_floor(info.height, info.round_index, info.packing_index);
        debug!(height = info.height, round = %key, validators = n, quorum, "voting session started");

        Ok(Self {
            height: info.height,
            validators,
            members,
            quorum,
            scheme: ctx.scheme.clone(),
            pool: BallotPool::new(ctx.config.ballot_pool_capacity),
            current: RoundState::new(key, info.round_start_time, quorum),
            future: FutureRoundCache::new(
                ctx.config.future_round_capacity,
                ctx.config.future_ballots_per_round,
            ),
            detector,
            previous: VecDeque::new(),
            proposal,
            outcome: None,
            delivered: false,
            cancelled: false,
            events: Vec::new(),
        })
    }

    // -- Inbound ------------------------------------------------------------

    /// Route a ballot to the current round, the future cache or the bin.
    pub fn receive(&mut self, ballot: Ballot) -> Result<ReceiveOutcome, ConsensusError> {
        let handle = self.pool.insert(ballot)?;
        self.process(handle)
    }

    /// Decode a wire ballot into a pooled slot and route it.
    pub fn receive_bytes(&mut self, bytes: &[u8]) -> Result<ReceiveOutcome, ConsensusError> {
        let handle = self.pool.decode(bytes)?;
        self.process(handle)
    }

    fn process(&mut self, handle: BallotHandle) -> Result<ReceiveOutcome, ConsensusError> {
        let body = *self.pool.get(handle)?.body();
        if body.height != self.height {
            self.release(handle);
            return Err(ConsensusError::WrongHeight {
                expected: self.height,
                got: body.height,
            });
        }

        let scheme = self.scheme.as_ref();
        let voter = match self.pool.get(handle).and_then(|b| b.voter(scheme).cloned()) {
            Ok(voter) => voter,
            Err(e) => {
                self.release(handle);
                return Err(e);
            }
        };
        if !self.members.contains(&voter) {
            self.release(handle);
            return Err(ConsensusError::UnknownValidator(voter));
        }

        let evidence = match self.pool.get(handle) {
            Ok(ballot) => self.detector.observe(&voter, ballot),
            Err(e) => {
                self.release(handle);
                return Err(e);
            }
        };
        if let Some(evidence) = evidence {
            self.on_bifurcation(evidence);
        }

        let key = body.round_key();
        let current = self.current.key();
        if key == current {
            return self.offer_current(&voter, handle);
        }

        if key > current && self.outcome.is_none() && !self.cancelled {
            let inserted = self.future.insert(key, voter, handle);
            for evicted in inserted.evicted {
                self.release(evicted);
            }
            if inserted.stored {
                trace!(round = %key, "cached future ballot");
                return Ok(ReceiveOutcome::Cached);
            }
            self.release(handle);
            return Ok(ReceiveOutcome::Dropped);
        }

        trace!(round = %key, current = %current, "stale ballot");
        self.release(handle);
        Ok(ReceiveOutcome::Stale)
    }

    fn offer_current(
        &mut self,
        voter: &ValidatorAddress,
        handle: BallotHandle,
    ) -> Result<ReceiveOutcome, ConsensusError> {
        let outcome = match self.current.offer(voter, handle, &self.pool) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release(handle);
                return Err(e);
            }
        };
        if !outcome.retains_ballot() {
            self.release(handle);
        }

        Ok(match outcome {
            OfferOutcome::Accepted => ReceiveOutcome::Accepted,
            OfferOutcome::Certified(certificate) => {
                let stage = certificate.stage();
                self.on_certified(certificate, true);
                ReceiveOutcome::Certified(stage)
            }
            OfferOutcome::DuplicateVoter => ReceiveOutcome::Duplicate,
            OfferOutcome::StageClosed { audited: true } => ReceiveOutcome::Audited,
            OfferOutcome::StageClosed { audited: false } => ReceiveOutcome::Duplicate,
        })
    }

    fn release(&mut self, handle: BallotHandle) {
        if let Err(e) = self.pool.release(handle) {
            trace!(error = %e, "ballot already released");
        }
    }

    // -- Transitions --------------------------------------------------------

    fn on_certified(&mut self, certificate: Certificate, local: bool) {
        self.events.push(SessionEvent::Certified {
            certificate: certificate.clone(),
            local,
        });
        if certificate.stage() == Stage::Two {
            self.confirm(certificate);
        }
    }

    fn confirm(&mut self, certificate: Certificate) {
        if self.is_confirmed() {
            return;
        }
        let outcome = if certificate.candidate().is_empty_block() {
            SessionOutcome::ConfirmedEmpty { certificate }
        } else {
            SessionOutcome::Confirmed {
                hash: certificate.candidate(),
                certificate,
            }
        };
        info!(
            height = self.height,
            round = %self.current.key(),
            empty = matches!(outcome, SessionOutcome::ConfirmedEmpty { .. }),
            "height confirmed"
        );
        self.outcome = Some(outcome.clone());
        self.events.push(SessionEvent::Confirmed(outcome));
        self.current.cancel();
        for handle in self.future.drain() {
            self.release(handle);
        }
    }

    fn on_bifurcation(&mut self, evidence: BifurcationEvidence) {
        self.events.push(SessionEvent::Bifurcation(evidence.clone()));
        if self.outcome.is_none() {
            self.outcome = Some(SessionOutcome::Bifurcated(evidence));
            self.current.cancel();
        }
    }

    /// The orchestrator's deadline for `stage` of round `key` expired.
    ///
    /// Aborts the round and opens the next sub-round of the same slot.
    /// Returns the new key, or `None` if the stage had already closed, the
    /// round is no longer current or the session is settled.
    pub fn on_stage_timeout(&mut self, key: RoundKey, stage: Stage) -> Option<RoundKey> {
        if self.outcome.is_some() || self.cancelled || key != self.current.key() {
            return None;
        }
        if !self.current.stage_mut(stage).abort() {
            return None;
        }
        let other = match stage {
            Stage::One => Stage::Two,
            Stage::Two => Stage::One,
        };
        self.current.stage_mut(other).abort();

        let to = key.next_sub_round();
        debug!(
            height = self.height,
            from = %key,
            to = %to,
            stage = %stage,
            "no quorum before deadline, escalating"
        );
        let start_time = self.current.start_time();
        self.advance_to(to, start_time);
        self.events.push(SessionEvent::Escalated { from: key, to });
        Some(to)
    }

    /// Move to a later `(round_index, packing_index)` of this height. Pending
    /// waits on the old round resolve with "escalate".
    pub fn begin_round(&mut self, info: RoundInfo) -> Result<(), ConsensusError> {
        if info.height != self.height {
            return Err(ConsensusError::WrongHeight {
                expected: self.height,
                got: info.height,
            });
        }
        if self.outcome.is_some() || self.cancelled {
            return Err(ConsensusError::SessionFinished(self.height));
        }
        let key = RoundKey::first(info.round_index, info.packing_index);
        let current = self.current.key();
        if (key.round_index, key.packing_index) <= (current.round_index, current.packing_index) {
            return Err(ConsensusError::RoundNotNewer(key.to_string()));
        }

        self.current.stage_mut(Stage::One).abort();
        self.current.stage_mut(Stage::Two).abort();
        self.proposal.send_replace(info.candidate);
        self.detector
            .advance_floor(self.height, info.round_index, info.packing_index);
        debug!(height = self.height, from = %current, to = %key, "beginning round");
        self.advance_to(key, info.round_start_time);
        Ok(())
    }

    /// Replace the current round and replay cached ballots for the new key.
    /// The new round exists before any of its ballots is offered.
    fn advance_to(&mut self, key: RoundKey, start_time: u32) {
        let previous =
            std::mem::replace(&mut self.current, RoundState::new(key, start_time, self.quorum));
        for handle in previous.handles() {
            self.release(handle);
        }
        self.previous
            .push_back((previous.key(), previous.voted_this_round().clone()));
        if self.previous.len() > MAX_PREVIOUS_ROUNDS {
            self.previous.pop_front();
        }

        for handle in self.future.take_older_than(&key) {
            self.release(handle);
        }
        let cached = self.future.take(&key);
        if !cached.is_empty() {
            debug!(round = %key, ballots = cached.len(), "replaying cached ballots");
        }
        for (voter, handle) in cached {
            if let Err(e) = self.offer_current(&voter, handle) {
                debug!(round = %key, error = %e, "cached ballot rejected on replay");
            }
        }
    }

    /// Deliver the producer's proposal for the current slot. Returns `false`
    /// if the slot has moved on.
    pub fn set_proposal(&mut self, round_index: u32, packing_index: u16, hash: BlockHash) -> bool {
        let key = self.current.key();
        if key.round_index != round_index || key.packing_index != packing_index {
            return false;
        }
        self.proposal.send_replace(Some(hash));
        true
    }

    /// Accept a certificate from a peer.
    ///
    /// A stage-two certificate for any round of this height confirms it. A
    /// stage-one certificate closes stage one of the current round. Returns
    /// whether the certificate changed anything.
    pub fn apply_certificate(&mut self, certificate: &Certificate) -> Result<bool, ConsensusError> {
        if certificate.height() != self.height {
            return Err(ConsensusError::WrongHeight {
                expected: self.height,
                got: certificate.height(),
            });
        }
        let signers = certificate.verify(self.scheme.as_ref(), &self.validators, self.quorum)?;

        for (ballot, voter) in certificate.ballots().zip(&signers) {
            if let Some(evidence) = self.detector.observe(voter, &ballot) {
                self.on_bifurcation(evidence);
            }
        }

        match certificate.stage() {
            Stage::Two => {
                if self.is_confirmed() {
                    return Ok(false);
                }
                self.on_certified(certificate.clone(), false);
                Ok(true)
            }
            Stage::One => {
                if self.outcome.is_some()
                    || certificate.round_key() != self.current.key()
                    || certificate.body().round_start_time != self.current.start_time()
                {
                    return Ok(false);
                }
                if !self.current.stage_mut(Stage::One).close_with(certificate.clone()) {
                    return Ok(false);
                }
                self.on_certified(certificate.clone(), false);
                Ok(true)
            }
        }
    }

    /// Sign a ballot for the current round, count it locally and return it
    /// for broadcast.
    pub fn cast(
        &mut self,
        stage: Stage,
        candidate: BlockHash,
        signer: &dyn BallotSigner,
    ) -> Result<Ballot, ConsensusError> {
        if self.outcome.is_some() || self.cancelled {
            return Err(ConsensusError::SessionFinished(self.height));
        }
        let key = self.current.key();
        let body = BallotBody {
            height: self.height,
            round_index: key.round_index,
            packing_index: key.packing_index,
            round_start_time: self.current.start_time(),
            sub_round: key.sub_round,
            stage,
            candidate,
        };
        let ballot = Ballot::sign(body, signer);
        let outcome = self.receive(ballot.clone())?;
        trace!(round = %key, stage = %stage, ?outcome, "cast local ballot");
        Ok(ballot)
    }

    /// Settle nothing and release every waiter; used when the node drops
    /// this height.
    pub fn cancel_all(&mut self) {
        self.cancelled = true;
        self.current.cancel();
        for handle in self.future.drain() {
            self.release(handle);
        }
    }

    // -- Catch-up -----------------------------------------------------------

    /// Ballots this node holds for `(key, stage)` from voters not in `known`.
    pub fn missing_ballots(
        &self,
        key: RoundKey,
        stage: Stage,
        known: &HashSet<ValidatorAddress>,
    ) -> Vec<Ballot> {
        if key != self.current.key() {
            return Vec::new();
        }
        self.current
            .stage(stage)
            .missing(known)
            .into_iter()
            .filter_map(|h| self.pool.get(h).ok().cloned())
            .collect()
    }

    /// Voters seen in the current round, either stage.
    pub fn voted_this_round(&self) -> &HashSet<ValidatorAddress> {
        self.current.voted_this_round()
    }

    /// Voter sets of earlier sub-rounds, oldest first. Diagnostic only.
    pub fn previous_rounds(&self) -> impl Iterator<Item = &(RoundKey, HashSet<ValidatorAddress>)> {
        self.previous.iter()
    }

    // -- Accessors ----------------------------------------------------------

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn validators(&self) -> &[ValidatorAddress] {
        &self.validators
    }

    pub fn current_key(&self) -> RoundKey {
        self.current.key()
    }

    pub fn current_round(&self) -> &RoundState {
        &self.current
    }

    pub fn has_voted(&self, stage: Stage, voter: &ValidatorAddress) -> bool {
        self.current.stage(stage).has_voted(voter)
    }

    pub fn subscribe(&self, stage: Stage) -> CompletionWaiter {
        self.current.stage(stage).subscribe()
    }

    pub fn stage_outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.current.stage(stage).outcome()
    }

    pub fn proposal(&self) -> Option<BlockHash> {
        *self.proposal.borrow()
    }

    pub fn proposal_receiver(&self) -> watch::Receiver<Option<BlockHash>> {
        self.proposal.subscribe()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_confirmed(&self) -> bool {
        self.outcome.as_ref().is_some_and(SessionOutcome::is_confirmed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The confirmed outcome, handed out once for delivery to block storage.
    pub fn take_delivery(&mut self) -> Option<SessionOutcome> {
        if self.delivered || !self.is_confirmed() {
            return None;
        }
        self.delivered = true;
        self.outcome.clone()
    }

    pub fn evidence(&self) -> &[BifurcationEvidence] {
        self.detector.evidence()
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pool(&self) -> &BallotPool {
        &self.pool
    }

    pub fn future_rounds(&self) -> usize {
        self.future.len()
    }
}
