//! Async driver for one voting session.
//!
//! The driver is the only place that waits. It casts this validator's
//! ballots, awaits each stage with a deadline, asks peers for missing
//! ballots when a stage is slow, escalates on timeout and hands the
//! confirmed height to block storage exactly once. Outbound traffic goes
//! onto a channel that the network layer drains.

use std::sync::Arc;
use std::time::Duration;

use palisade_types::{BlockHash, Clock};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::ballot::{Ballot, Stage};
use crate::bifurcation::BifurcationEvidence;
use crate::catch_up::CatchUpRequest;
use crate::certificate::Certificate;
use crate::completion::{CompletionWaiter, StageOutcome};
use crate::config::VotingConfig;
use crate::round::RoundKey;
use crate::scheme::BallotSigner;
use crate::services::{BlockService, EvidenceSink};
use crate::session::{SessionEvent, SessionOutcome, VotingSession};

/// Messages the voting core wants on the validator mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Ballot(Ballot),
    Certificate(Certificate),
    CatchUp(CatchUpRequest),
}

/// Callback invoked for every routed session event.
pub type EventObserver = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Dispatches session events: locally built certificates go out to peers,
/// bifurcation evidence goes to the evidence sink.
#[derive(Clone)]
pub struct EventRouter {
    outbound: mpsc::Sender<Outbound>,
    evidence: Arc<dyn EvidenceSink>,
    observer: Option<EventObserver>,
}

impl EventRouter {
    pub fn new(outbound: mpsc::Sender<Outbound>, evidence: Arc<dyn EvidenceSink>) -> Self {
        Self {
            outbound,
            evidence,
            observer: None,
        }
    }

    /// Also hand every routed event to `observer` (metrics, tests).
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Queue a message. Never waits; a full queue drops the message.
    pub fn send(&self, message: Outbound) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "outbound consensus queue rejected message");
                false
            }
        }
    }

    /// Act on `events` and hand them back for bookkeeping (metrics).
    pub fn route(&self, events: Vec<SessionEvent>) -> Vec<SessionEvent> {
        for event in &events {
            if let Some(observer) = &self.observer {
                observer(event);
            }
            match event {
                SessionEvent::Certified {
                    certificate,
                    local: true,
                } => {
                    self.send(Outbound::Certificate(certificate.clone()));
                }
                SessionEvent::Bifurcation(BifurcationEvidence {
                    voter,
                    first,
                    second,
                }) => self.evidence.report_bifurcation(voter, first, second),
                _ => {}
            }
        }
        events
    }
}

/// Hand a confirmed outcome to block storage if it has not been handed over
/// yet. Returns the outcome and the storage verdict.
pub fn deliver_confirmed(
    session: &mut VotingSession,
    blocks: &dyn BlockService,
) -> Option<(SessionOutcome, bool)> {
    let outcome = session.take_delivery()?;
    let height = session.height();
    let stored = match &outcome {
        SessionOutcome::Confirmed { hash, certificate } => {
            blocks.save_confirmed_block(height, *hash, certificate)
        }
        SessionOutcome::ConfirmedEmpty { certificate } => blocks.save_empty_block(height, certificate),
        SessionOutcome::Bifurcated(_) => false,
    };
    if stored {
        info!(height, "confirmed height delivered to block storage");
    } else {
        warn!(height, "block storage refused confirmed height");
    }
    Some((outcome, stored))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverExit {
    Delivered(SessionOutcome),
    /// Block storage returned `false`.
    DeliveryRefused(SessionOutcome),
    Bifurcated(BifurcationEvidence),
    /// The session was cancelled or settled and delivered elsewhere.
    Cancelled,
}

pub struct SessionDriver {
    session: Arc<Mutex<VotingSession>>,
    signer: Arc<dyn BallotSigner>,
    config: VotingConfig,
    router: EventRouter,
    blocks: Arc<dyn BlockService>,
    clock: Arc<dyn Clock>,
}

impl SessionDriver {
    pub fn new(
        session: Arc<Mutex<VotingSession>>,
        signer: Arc<dyn BallotSigner>,
        config: VotingConfig,
        router: EventRouter,
        blocks: Arc<dyn BlockService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            signer,
            config,
            router,
            blocks,
            clock,
        }
    }

    /// Drive the session until the height settles or it is cancelled.
    pub async fn run(self) -> DriverExit {
        loop {
            let (key, start_time, proposal) = {
                let mut session = self.session.lock().await;
                if let Some(exit) = self.settle(&mut session) {
                    return exit;
                }
                (
                    session.current_key(),
                    session.current_round().start_time(),
                    session.proposal_receiver(),
                )
            };

            let candidate = if key.sub_round == 1 {
                self.await_proposal(proposal, start_time).await
            } else {
                *proposal.borrow()
            };
            let candidate = candidate.unwrap_or(BlockHash::EMPTY_BLOCK);

            let Some(waiter) = self.cast(key, Stage::One, candidate).await else {
                continue;
            };
            let StageOutcome::Certified(certificate) =
                self.await_stage(key, Stage::One, waiter).await
            else {
                continue;
            };

            let Some(waiter) = self.cast(key, Stage::Two, certificate.candidate()).await else {
                continue;
            };
            // Whatever stage two resolves to, the top of the loop decides.
            let _ = self.await_stage(key, Stage::Two, waiter).await;
        }
    }

    fn settle(&self, session: &mut VotingSession) -> Option<DriverExit> {
        self.router.route(session.take_events());
        match session.outcome() {
            Some(SessionOutcome::Bifurcated(evidence)) => {
                return Some(DriverExit::Bifurcated(evidence.clone()));
            }
            Some(_) => {
                return Some(match deliver_confirmed(session, self.blocks.as_ref()) {
                    Some((outcome, true)) => DriverExit::Delivered(outcome),
                    Some((outcome, false)) => DriverExit::DeliveryRefused(outcome),
                    None => DriverExit::Cancelled,
                });
            }
            None => {}
        }
        session.is_cancelled().then_some(DriverExit::Cancelled)
    }

    /// Wait for the proposal until `round_start_time + proposal_timeout`.
    async fn await_proposal(
        &self,
        mut proposal: watch::Receiver<Option<BlockHash>>,
        round_start_time: u32,
    ) -> Option<BlockHash> {
        let elapsed = self
            .clock
            .now()
            .as_secs()
            .saturating_sub(round_start_time as u64);
        let wait = self
            .config
            .proposal_timeout()
            .saturating_sub(Duration::from_secs(elapsed));

        let arrived = match tokio::time::timeout(wait, proposal.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => *value,
            _ => None,
        };
        if arrived.is_none() {
            debug!(round_start_time, "no proposal before deadline, voting empty");
        }
        arrived.or_else(|| *proposal.borrow())
    }

    /// Cast this validator's ballot for `stage` unless the round moved on.
    /// Returns a waiter on the stage's completion.
    async fn cast(&self, key: RoundKey, stage: Stage, candidate: BlockHash) -> Option<CompletionWaiter> {
        let mut session = self.session.lock().await;
        if session.current_key() != key || session.outcome().is_some() || session.is_cancelled() {
            return None;
        }
        let waiter = session.subscribe(stage);
        if !session.has_voted(stage, self.signer.address()) {
            match session.cast(stage, candidate, self.signer.as_ref()) {
                Ok(ballot) => {
                    debug!(round = %key, stage = %stage, candidate = %candidate, "cast ballot");
                    self.router.send(Outbound::Ballot(ballot));
                }
                Err(e) => warn!(round = %key, stage = %stage, error = %e, "could not cast ballot"),
            }
        }
        self.router.route(session.take_events());
        Some(waiter)
    }

    async fn await_stage(&self, key: RoundKey, stage: Stage, waiter: CompletionWaiter) -> StageOutcome {
        let mut wait = Box::pin(waiter.wait());
        let stage_timeout = self.config.stage_timeout();
        let catch_up_after = self.config.catch_up_after();

        if catch_up_after < stage_timeout {
            if let Ok(outcome) = tokio::time::timeout(catch_up_after, &mut wait).await {
                return outcome;
            }
            self.request_catch_up(key, stage).await;
            if let Ok(outcome) =
                tokio::time::timeout(stage_timeout - catch_up_after, &mut wait).await
            {
                return outcome;
            }
        } else if let Ok(outcome) = tokio::time::timeout(stage_timeout, &mut wait).await {
            return outcome;
        }

        let escalated = {
            let mut session = self.session.lock().await;
            let next = session.on_stage_timeout(key, stage);
            self.router.route(session.take_events());
            next
        };
        match escalated {
            Some(_) => StageOutcome::Escalate,
            // Closed concurrently with the deadline; the completion is set.
            None => wait.await,
        }
    }

    async fn request_catch_up(&self, key: RoundKey, stage: Stage) {
        let session = self.session.lock().await;
        if session.current_key() != key || session.outcome().is_some() {
            return;
        }
        let request = CatchUpRequest::for_session(&session, stage);
        debug!(round = %key, stage = %stage, known = request.known.len(), "requesting missing ballots");
        self.router.send(Outbound::CatchUp(request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use palisade_types::{Timestamp, ValidatorAddress};

    use crate::ballot::BallotBody;
    use crate::context::ConsensusContext;
    use crate::scheme::KeyPairSigner;
    use crate::services::StaticValidatorSet;
    use crate::session::RoundInfo;

    #[derive(Default)]
    struct Blocks {
        saved: StdMutex<Vec<(u64, BlockHash)>>,
    }

    impl BlockService for Blocks {
        fn save_confirmed_block(&self, height: u64, hash: BlockHash, _: &Certificate) -> bool {
            self.saved.lock().unwrap().push((height, hash));
            true
        }

        fn save_empty_block(&self, height: u64, _: &Certificate) -> bool {
            self.saved.lock().unwrap().push((height, BlockHash::EMPTY_BLOCK));
            true
        }
    }

    #[derive(Default)]
    struct Evidence {
        reports: StdMutex<Vec<ValidatorAddress>>,
    }

    impl EvidenceSink for Evidence {
        fn report_bifurcation(&self, voter: &ValidatorAddress, _: &Ballot, _: &Ballot) {
            self.reports.lock().unwrap().push(voter.clone());
        }
    }

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.0)
        }
    }

    struct Harness {
        signers: Vec<Arc<KeyPairSigner>>,
        session: Arc<Mutex<VotingSession>>,
        blocks: Arc<Blocks>,
        evidence: Arc<Evidence>,
        outbound: mpsc::Receiver<Outbound>,
        driver: Option<SessionDriver>,
        start: u32,
    }

    fn fast_config() -> VotingConfig {
        VotingConfig {
            proposal_timeout_ms: 20,
            stage_timeout_ms: 60,
            catch_up_after_ms: 20,
            ..VotingConfig::default()
        }
    }

    fn harness(candidate: Option<BlockHash>) -> Harness {
        harness_with(candidate, fast_config(), 0)
    }

    /// The driver's clock reads `round_start_time + clock_offset_secs`.
    fn harness_with(
        candidate: Option<BlockHash>,
        config: VotingConfig,
        clock_offset_secs: u64,
    ) -> Harness {
        let signers: Vec<Arc<KeyPairSigner>> = (1..=4u8)
            .map(|i| Arc::new(KeyPairSigner::from_seed(&[i; 32])))
            .collect();
        let set = StaticValidatorSet::new(signers.iter().map(|s| s.address().clone()).collect(), 67);
        let ctx = ConsensusContext::ed25519(config.clone(), Arc::new(set));
        let start = Timestamp::now().as_secs() as u32;
        let info = RoundInfo {
            height: 11,
            round_index: 1,
            packing_index: 0,
            round_start_time: start,
            candidate,
        };
        let session = Arc::new(Mutex::new(VotingSession::new(&ctx, info).unwrap()));
        let blocks = Arc::new(Blocks::default());
        let evidence = Arc::new(Evidence::default());
        let (tx, outbound) = mpsc::channel(64);
        let driver = SessionDriver::new(
            session.clone(),
            signers[0].clone(),
            config,
            EventRouter::new(tx, evidence.clone()),
            blocks.clone(),
            Arc::new(FixedClock(start as u64 + clock_offset_secs)),
        );
        Harness {
            signers,
            session,
            blocks,
            evidence,
            outbound,
            driver: Some(driver),
            start,
        }
    }

    impl Harness {
        fn ballot(&self, who: usize, sub_round: u32, stage: Stage, candidate: BlockHash) -> Ballot {
            Ballot::sign(
                BallotBody {
                    height: 11,
                    round_index: 1,
                    packing_index: 0,
                    round_start_time: self.start,
                    sub_round,
                    stage,
                    candidate,
                },
                self.signers[who].as_ref(),
            )
        }

        fn take_driver(&mut self) -> SessionDriver {
            self.driver.take().expect("driver already taken")
        }

        fn drain(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Ok(msg) = self.outbound.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    #[tokio::test]
    async fn confirms_and_delivers_once() {
        let h = BlockHash::new([5; 32]);
        let mut hx = harness(Some(h));
        {
            let mut session = hx.session.lock().await;
            for who in 1..3 {
                session.receive(hx.ballot(who, 1, Stage::One, h)).unwrap();
                session.receive(hx.ballot(who, 1, Stage::Two, h)).unwrap();
            }
        }
        let blocks = hx.blocks.clone();
        let driver = hx.take_driver();
        let exit = tokio::time::timeout(Duration::from_secs(2), driver.run())
            .await
            .unwrap();

        assert!(matches!(exit, DriverExit::Delivered(SessionOutcome::Confirmed { hash, .. }) if hash == h));
        assert_eq!(*blocks.saved.lock().unwrap(), vec![(11, h)]);

        let sent = hx.drain();
        let ballots = sent.iter().filter(|m| matches!(m, Outbound::Ballot(_))).count();
        let certs = sent
            .iter()
            .filter(|m| matches!(m, Outbound::Certificate(_)))
            .count();
        assert_eq!(ballots, 2, "one ballot per stage");
        assert_eq!(certs, 2, "both locally built certificates are broadcast");
    }

    #[tokio::test]
    async fn split_vote_escalates_then_cancels() {
        let mut hx = harness(None);
        {
            let mut session = hx.session.lock().await;
            session
                .receive(hx.ballot(1, 1, Stage::One, BlockHash::new([1; 32])))
                .unwrap();
            session
                .receive(hx.ballot(2, 1, Stage::One, BlockHash::new([2; 32])))
                .unwrap();
        }
        let driver = hx.take_driver();
        let task = tokio::spawn(driver.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        {
            let mut session = hx.session.lock().await;
            assert!(session.current_key().sub_round >= 2);
            session.cancel_all();
        }
        let exit = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, DriverExit::Cancelled);

        let sent = hx.drain();
        assert!(sent.iter().any(|m| matches!(m, Outbound::CatchUp(_))));
        let Some(Outbound::Ballot(first)) = sent.first() else {
            panic!("first message should be our stage-one ballot");
        };
        assert!(first.candidate().is_empty_block(), "no proposal, so empty");
        assert!(hx.blocks.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn proposal_deadline_is_measured_on_the_driver_clock() {
        let config = VotingConfig {
            proposal_timeout_ms: 60_000,
            ..fast_config()
        };
        let mut hx = harness_with(None, config, 120);
        let driver = hx.take_driver();
        let task = tokio::spawn(driver.run());

        let first = tokio::time::timeout(Duration::from_secs(1), hx.outbound.recv())
            .await
            .expect("deadline already passed, so the driver votes at once");
        let ballot = match first {
            Some(Outbound::Ballot(ballot)) => ballot,
            other => panic!("expected our stage-one ballot, got {other:?}"),
        };
        assert_eq!(ballot.stage(), Stage::One);
        assert!(ballot.candidate().is_empty_block());

        hx.session.lock().await.cancel_all();
        let exit = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, DriverExit::Cancelled);
    }

    #[tokio::test]
    async fn peer_certificate_settles_a_waiting_driver() {
        let h = BlockHash::new([8; 32]);
        let mut hx = harness(Some(h));
        let driver = hx.take_driver();
        let task = tokio::spawn(driver.run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let votes: Vec<Ballot> = (1..4).map(|who| hx.ballot(who, 1, Stage::Two, h)).collect();
        let cert = Certificate::build(&votes).unwrap();
        assert!(hx.session.lock().await.apply_certificate(&cert).unwrap());

        let exit = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(exit, DriverExit::Delivered(_)));
        assert_eq!(hx.blocks.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bifurcation_is_reported_and_ends_the_drive() {
        let h = BlockHash::new([8; 32]);
        let mut hx = harness(Some(h));
        {
            let mut session = hx.session.lock().await;
            session.receive(hx.ballot(3, 1, Stage::One, h)).unwrap();
            session
                .receive(hx.ballot(3, 2, Stage::One, BlockHash::new([9; 32])))
                .unwrap();
        }
        let driver = hx.take_driver();
        let exit = tokio::time::timeout(Duration::from_secs(2), driver.run())
            .await
            .unwrap();
        assert!(matches!(exit, DriverExit::Bifurcated(_)));
        assert_eq!(
            *hx.evidence.reports.lock().unwrap(),
            vec![hx.signers[3].address().clone()]
        );
    }

    #[test]
    fn observer_sees_every_routed_event() {
        let (tx, _rx) = mpsc::channel(4);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let log = seen.clone();
        let router = EventRouter::new(tx, Arc::new(Evidence::default())).with_observer(Arc::new(
            move |event: &SessionEvent| log.lock().unwrap().push(event.clone()),
        ));

        let from = RoundKey::first(3, 0);
        let event = SessionEvent::Escalated {
            from,
            to: from.next_sub_round(),
        };
        let returned = router.route(vec![event.clone()]);

        assert_eq!(returned, vec![event.clone()]);
        assert_eq!(*seen.lock().unwrap(), vec![event]);
    }
}
