//! The node's consensus service: overlay frames in, confirmed heights out.
//!
//! Inbound path: overlay authentication, duplicate suppression, envelope
//! decode, then the active [`VotingSession`] (or the early-ballot buffer for
//! heights not started yet). Each height gets a [`SessionDriver`] task that
//! casts this validator's ballots and enforces deadlines; its outbound
//! traffic is drained onto the validator mesh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use palisade_consensus::{
    deliver_confirmed, Ballot, BallotSigner, BlockService, ConsensusContext, ConsensusError,
    DriverExit, EventRouter, EvidenceSink, KeyPairSigner, Outbound, RoundInfo, SessionDriver,
    SessionEvent, StaticValidatorSet, VotingSession,
};
use palisade_crypto::keypair_from_seed;
use palisade_network::{
    DuplicateSuppressor, NetworkError, NetworkService, OverlayEvent, ValidatorOverlay,
};
use palisade_types::{BlockHash, Clock, NodeId, ValidatorAddress};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::config::NodeConfig;
use crate::message::{decode_ballots, decode_certificate, ConsensusMessage};
use crate::metrics::ConsensusMetrics;
use crate::tracing_spans::{consensus_recv_span, overlay_recv_span, session_span};
use crate::NodeError;

/// External collaborators of the service.
pub struct ServiceDeps {
    pub network: Arc<dyn NetworkService>,
    pub blocks: Arc<dyn BlockService>,
    pub evidence: Arc<dyn EvidenceSink>,
    pub clock: Arc<dyn Clock>,
}

struct ActiveHeight {
    height: u64,
    session: Arc<Mutex<VotingSession>>,
    driver: Option<JoinHandle<DriverExit>>,
}

/// Ballots for heights above the active one, bounded in total.
///
/// Once a height has started, only the next `window` heights are held. When
/// full, a ballot for a lower height displaces one for the highest height.
struct EarlyBallots {
    by_height: BTreeMap<u64, Vec<Ballot>>,
    count: usize,
    limit: usize,
    window: u64,
    started: Option<u64>,
}

impl EarlyBallots {
    fn new(limit: usize, window: u64) -> Self {
        Self {
            by_height: BTreeMap::new(),
            count: 0,
            limit,
            window,
            started: None,
        }
    }

    fn push(&mut self, ballot: Ballot) -> bool {
        let height = ballot.height();
        if self
            .started
            .is_some_and(|started| height <= started || height > started.saturating_add(self.window))
        {
            return false;
        }
        if self.count >= self.limit {
            let Some(mut highest) = self.by_height.last_entry() else {
                return false;
            };
            if height >= *highest.key() {
                return false;
            }
            highest.get_mut().pop();
            if highest.get().is_empty() {
                highest.remove();
            }
            self.count -= 1;
        }
        self.by_height.entry(height).or_default().push(ballot);
        self.count += 1;
        true
    }

    /// Ballots for `height`; anything older is discarded.
    fn take(&mut self, height: u64) -> Vec<Ballot> {
        self.started = Some(self.started.map_or(height, |started| started.max(height)));
        let later = self.by_height.split_off(&height.saturating_add(1));
        let mut older = std::mem::replace(&mut self.by_height, later);
        let ballots = older.remove(&height).unwrap_or_default();
        let dropped: usize = older.values().map(Vec::len).sum();
        self.count -= ballots.len() + dropped;
        ballots
    }
}

pub struct ConsensusService {
    ctx: ConsensusContext,
    signer: Arc<KeyPairSigner>,
    overlay: Mutex<ValidatorOverlay>,
    dedup: Mutex<DuplicateSuppressor>,
    blocks: Arc<dyn BlockService>,
    router: EventRouter,
    outbound_rx: Mutex<mpsc::Receiver<Outbound>>,
    metrics: Arc<ConsensusMetrics>,
    clock: Arc<dyn Clock>,
    active: Mutex<Option<ActiveHeight>>,
    early: Mutex<EarlyBallots>,
    maintain_interval: Duration,
    metrics_enabled: bool,
}

impl ConsensusService {
    pub fn new(config: &NodeConfig, deps: ServiceDeps) -> Result<Self, NodeError> {
        config.validate()?;
        let seed = config.validator_seed_bytes()?;
        let entries = config.validator_entries()?;
        if entries.is_empty() {
            return Err(NodeError::Config("validator set is empty".into()));
        }

        let set = StaticValidatorSet::new(
            entries.iter().map(|(address, _)| address.clone()).collect(),
            config.voting.byzantine_ratio_percent,
        );
        let ctx = ConsensusContext::ed25519(config.voting.clone(), Arc::new(set));
        let signer = Arc::new(KeyPairSigner::from_seed(&seed));
        if !entries.iter().any(|(address, _)| address == signer.address()) {
            warn!(address = %signer.address(), "local key is not in the validator set; its ballots will be rejected");
        }

        let overlay = ValidatorOverlay::new(
            keypair_from_seed(&seed),
            config.node_id(),
            entries,
            deps.network,
            config.overlay.clone(),
            &config.dedup,
        );

        let metrics = Arc::new(ConsensusMetrics::new()?);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue);
        let observed = metrics.clone();
        let router = EventRouter::new(outbound_tx, deps.evidence)
            .with_observer(Arc::new(move |event: &SessionEvent| observed.record_event(event)));

        info!(
            address = %signer.address(),
            node = %config.node_id,
            validators = config.validators.len(),
            "consensus service created"
        );

        Ok(Self {
            ctx,
            signer,
            overlay: Mutex::new(overlay),
            dedup: Mutex::new(DuplicateSuppressor::from_config(&config.dedup)),
            blocks: deps.blocks,
            router,
            outbound_rx: Mutex::new(outbound_rx),
            metrics,
            clock: deps.clock,
            active: Mutex::new(None),
            early: Mutex::new(EarlyBallots::new(
                config.early_ballot_limit,
                config.early_height_window,
            )),
            maintain_interval: Duration::from_secs(config.maintain_interval_secs.max(1)),
            metrics_enabled: config.enable_metrics,
        })
    }

    pub fn address(&self) -> &ValidatorAddress {
        self.signer.address()
    }

    pub fn metrics(&self) -> &Arc<ConsensusMetrics> {
        &self.metrics
    }

    /// Prometheus text exposition, or `None` when `enable_metrics` is off.
    pub fn metrics_text(&self) -> Result<Option<String>, NodeError> {
        if !self.metrics_enabled {
            return Ok(None);
        }
        self.metrics.encode_text().map(Some)
    }

    pub async fn connected_validators(&self) -> usize {
        self.overlay.lock().await.connected_count()
    }

    pub async fn active_height(&self) -> Option<u64> {
        self.active.lock().await.as_ref().map(|a| a.height)
    }

    /// The session of the active height, if any.
    pub async fn session(&self) -> Option<Arc<Mutex<VotingSession>>> {
        self.active.lock().await.as_ref().map(|a| a.session.clone())
    }

    // -- Scheduler input -------------------------------------------------------------

    /// Start voting on the slot described by `info`.
    ///
    /// A later slot of the active height moves the running session forward;
    /// a higher height (or a height whose session ended in bifurcation)
    /// starts a fresh session and driver.
    pub async fn start_round(&self, info: RoundInfo) -> Result<(), NodeError> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if info.height < current.height {
                return Err(ConsensusError::WrongHeight {
                    expected: current.height,
                    got: info.height,
                }
                .into());
            }
            let mut session = current.session.lock().await;
            if info.height == current.height {
                if session.is_confirmed() {
                    return Err(ConsensusError::SessionFinished(info.height).into());
                }
                if session.outcome().is_none() && !session.is_cancelled() {
                    session.begin_round(info)?;
                    self.settle(&mut session);
                    return Ok(());
                }
                info!(height = info.height, round_index = info.round_index, "restarting height after bifurcation");
            }
            session.cancel_all();
        }

        let mut session = VotingSession::new(&self.ctx, info)?;
        let early = self.early.lock().await.take(info.height);
        if !early.is_empty() {
            debug!(height = info.height, ballots = early.len(), "replaying early ballots");
        }
        for ballot in early {
            match session.receive(ballot) {
                Ok(outcome) => self.metrics.record_receive(outcome),
                Err(e) => {
                    self.metrics.ballots_rejected.inc();
                    debug!(height = info.height, error = %e, "early ballot rejected");
                }
            }
        }
        self.settle(&mut session);

        let session = Arc::new(Mutex::new(session));
        let driver = SessionDriver::new(
            session.clone(),
            self.signer.clone(),
            self.ctx.config.clone(),
            self.router.clone(),
            self.blocks.clone(),
            self.clock.clone(),
        );
        let span = session_span(info.height, info.round_index, info.packing_index);
        let handle = tokio::spawn(
            async move {
                let exit = driver.run().await;
                debug!(?exit, "session driver finished");
                exit
            }
            .instrument(span),
        );

        self.metrics.current_height.set(info.height as i64);
        *active = Some(ActiveHeight {
            height: info.height,
            session,
            driver: Some(handle),
        });
        Ok(())
    }

    /// Deliver a proposal that arrived after its round started.
    pub async fn set_proposal(&self, round_index: u32, packing_index: u16, hash: BlockHash) -> bool {
        let Some(session) = self.session().await else {
            return false;
        };
        let mut session = session.lock().await;
        session.set_proposal(round_index, packing_index, hash)
    }

    /// Wait for the active height's driver to finish.
    pub async fn wait_for_driver(&self) -> Option<DriverExit> {
        let handle = self.active.lock().await.as_mut()?.driver.take()?;
        match handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(error = %e, "session driver task failed");
                None
            }
        }
    }

    /// Cancel the active height.
    pub async fn stop(&self) {
        if let Some(active) = self.active.lock().await.as_ref() {
            active.session.lock().await.cancel_all();
        }
    }

    // -- Overlay ---------------------------------------------------------------------

    pub async fn announce(&self) -> usize {
        let now = self.clock.now();
        let mut overlay = self.overlay.lock().await;
        let announced = overlay.announce(now);
        self.metrics.connected_validators.set(overlay.connected_count() as i64);
        announced
    }

    pub async fn maintain(&self) {
        let now = self.clock.now();
        let mut overlay = self.overlay.lock().await;
        let report = overlay.maintain(now);
        self.metrics.connected_validators.set(overlay.connected_count() as i64);
        debug!(
            redialed = report.redialed,
            failed = report.failed,
            announced = report.announced,
            "overlay maintenance"
        );
    }

    pub async fn leave(&self) {
        let now = self.clock.now();
        let mut overlay = self.overlay.lock().await;
        overlay.leave(now);
        self.metrics.connected_validators.set(0);
    }

    /// The connection layer lost the link to `node`.
    pub async fn connection_lost(&self, node: &NodeId) {
        let mut overlay = self.overlay.lock().await;
        if let Some(address) = overlay.connection_lost(node) {
            info!(validator = %address, "validator link lost");
        }
        self.metrics.connected_validators.set(overlay.connected_count() as i64);
    }

    // -- Inbound ---------------------------------------------------------------------

    /// Handle one frame from the connection layer.
    pub async fn handle_frame(&self, from: &NodeId, bytes: &[u8]) -> Result<(), NodeError> {
        let span = overlay_recv_span(from.as_str());
        async {
            let now = self.clock.now();
            let result = {
                let mut overlay = self.overlay.lock().await;
                let result = overlay.handle_frame(from, bytes, now);
                self.metrics.connected_validators.set(overlay.connected_count() as i64);
                result
            };

            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    if matches!(
                        e,
                        NetworkError::OverlayAuthFailure(_)
                            | NetworkError::NotValidator(_)
                            | NetworkError::ClockSkew { .. }
                    ) {
                        self.metrics.overlay_auth_failures.inc();
                    }
                    debug!(error = %e, "dropped overlay frame");
                    return Err(e.into());
                }
            };

            match event {
                OverlayEvent::Consensus { from, payload } => self.handle_consensus(&from, &payload).await,
                OverlayEvent::Joined(validators) => {
                    for validator in validators {
                        info!(validator = %validator, "validator joined the overlay");
                    }
                    Ok(())
                }
                OverlayEvent::Left(validator) => {
                    info!(validator = %validator, "validator left the overlay");
                    Ok(())
                }
                OverlayEvent::Duplicate | OverlayEvent::Ignored => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_consensus(&self, from: &ValidatorAddress, payload: &[u8]) -> Result<(), NodeError> {
        if self.dedup.lock().await.check_message(payload) {
            self.metrics.messages_suppressed.inc();
            return Ok(());
        }
        let message = ConsensusMessage::decode(payload)?;
        let span = consensus_recv_span(from.as_str(), message.kind());
        async {
            match message {
                ConsensusMessage::Ballot(bytes) => {
                    match Ballot::decode(&bytes) {
                        Ok(ballot) => self.on_ballot(ballot).await,
                        Err(e) => {
                            self.metrics.ballots_rejected.inc();
                            debug!(error = %e, "malformed ballot");
                        }
                    }
                    Ok(())
                }
                ConsensusMessage::Certificate(bytes) => self.on_certificate(&bytes).await,
                ConsensusMessage::CatchUpRequest(request) => {
                    let ballots = match self.session().await {
                        Some(session) => request.answer(&*session.lock().await),
                        None => Vec::new(),
                    };
                    if ballots.is_empty() {
                        return Ok(());
                    }
                    let bytes = ConsensusMessage::catch_up_response(&ballots).encode()?;
                    let sent = self.overlay.lock().await.send_to_validator(from, &bytes);
                    debug!(ballots = ballots.len(), sent, "answered catch-up request");
                    Ok(())
                }
                ConsensusMessage::CatchUpResponse(encoded) => {
                    for ballot in decode_ballots(&encoded) {
                        self.on_ballot(ballot).await;
                    }
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn on_ballot(&self, ballot: Ballot) {
        self.metrics.ballots_received.inc();
        let height = ballot.height();

        let active = self.active.lock().await;
        let session = match active.as_ref() {
            Some(current) if current.height == height => current.session.clone(),
            Some(current) if height < current.height => {
                self.metrics.ballots_stale.inc();
                return;
            }
            _ => {
                if let Err(e) = self.check_voter(&ballot) {
                    self.metrics.ballots_rejected.inc();
                    debug!(height, error = %e, "early ballot rejected");
                    return;
                }
                // Buffered under the `active` lock so a concurrent start
                // cannot miss it.
                if self.early.lock().await.push(ballot) {
                    self.metrics.ballots_early.inc();
                } else {
                    debug!(height, "early ballot not buffered");
                }
                return;
            }
        };
        drop(active);

        let mut session = session.lock().await;
        match session.receive(ballot) {
            Ok(outcome) => self.metrics.record_receive(outcome),
            Err(e) => {
                self.metrics.ballots_rejected.inc();
                debug!(height, error = %e, "ballot rejected");
            }
        }
        self.settle(&mut session);
    }

    /// Signature and membership, checked before a ballot is held for a
    /// height that has no session yet.
    fn check_voter(&self, ballot: &Ballot) -> Result<(), ConsensusError> {
        let voter = ballot.voter(self.ctx.scheme.as_ref())?;
        if !self.ctx.validators.current_set(ballot.height()).contains(voter) {
            return Err(ConsensusError::UnknownValidator(voter.clone()));
        }
        Ok(())
    }

    async fn on_certificate(&self, bytes: &[u8]) -> Result<(), NodeError> {
        let certificate = decode_certificate(bytes)?;
        let Some(session) = self.session().await else {
            return Ok(());
        };
        let mut session = session.lock().await;
        if certificate.height() != session.height() {
            debug!(height = certificate.height(), "certificate for another height");
            return Ok(());
        }
        let applied = session.apply_certificate(&certificate);
        self.settle(&mut session);
        let changed = applied?;
        debug!(
            stage = %certificate.stage(),
            candidate = %certificate.candidate(),
            changed,
            "peer certificate"
        );
        Ok(())
    }

    /// Route pending events and hand a confirmed height to block storage.
    fn settle(&self, session: &mut VotingSession) {
        self.router.route(session.take_events());
        if let Some((_, stored)) = deliver_confirmed(session, self.blocks.as_ref()) {
            debug!(height = session.height(), stored, "delivered from inbound path");
        }
    }

    // -- Outbound --------------------------------------------------------------------

    async fn send_outbound(&self, message: &Outbound) {
        let envelope = ConsensusMessage::from(message);
        match envelope.encode() {
            Ok(bytes) => {
                let sent = self.overlay.lock().await.send_to_validators(&bytes, None);
                debug!(kind = envelope.kind(), sent, "sent consensus message");
            }
            Err(e) => warn!(error = %e, "failed to encode consensus message"),
        }
    }

    /// Send everything queued by the drivers. Returns how many messages
    /// were drained; zero while [`ConsensusService::run`] owns the queue.
    pub async fn flush_outbound(&self) -> usize {
        let mut drained = Vec::new();
        {
            let Ok(mut rx) = self.outbound_rx.try_lock() else {
                return 0;
            };
            while let Ok(message) = rx.try_recv() {
                drained.push(message);
            }
        }
        for message in &drained {
            self.send_outbound(message).await;
        }
        drained.len()
    }

    /// Main loop: inbound frames, outbound queue, periodic overlay
    /// maintenance, until shutdown or the inbound channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<(NodeId, Vec<u8>)>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        self.announce().await;
        let mut ticker = tokio::time::interval(self.maintain_interval);
        ticker.tick().await;
        let mut outbound = self.outbound_rx.lock().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("consensus service shutting down");
                    break;
                }
                Some(message) = outbound.recv() => self.send_outbound(&message).await,
                frame = inbound.recv() => match frame {
                    Some((from, bytes)) => {
                        if let Err(e) = self.handle_frame(&from, &bytes).await {
                            debug!(node = %from, error = %e, "inbound frame dropped");
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.maintain().await,
            }
        }

        drop(outbound);
        self.stop().await;
        self.leave().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(height: u64, seed: u8) -> Ballot {
        let body = palisade_consensus::BallotBody {
            height,
            ..Default::default()
        };
        Ballot::sign(body, &KeyPairSigner::from_seed(&[seed; 32]))
    }

    #[test]
    fn full_buffer_keeps_the_lowest_heights() {
        let mut early = EarlyBallots::new(2, 8);
        assert!(early.push(ballot(u64::MAX, 1)));
        assert!(early.push(ballot(u64::MAX, 2)));
        assert!(!early.push(ballot(u64::MAX, 3)));

        assert!(early.push(ballot(5, 1)));
        assert!(early.push(ballot(6, 1)));
        assert!(!early.push(ballot(7, 1)));
        assert_eq!(early.count, 2);
        assert_eq!(early.take(5).len(), 1);
        assert_eq!(early.count, 1);
    }

    #[test]
    fn started_height_bounds_the_window() {
        let mut early = EarlyBallots::new(10, 2);
        assert!(early.take(4).is_empty());
        assert!(!early.push(ballot(4, 1)), "already started");
        assert!(early.push(ballot(5, 1)));
        assert!(early.push(ballot(6, 1)));
        assert!(!early.push(ballot(7, 1)));
        assert!(!early.push(ballot(u64::MAX, 1)));
    }

    #[test]
    fn taking_a_height_discards_older_ones() {
        let mut early = EarlyBallots::new(10, 8);
        early.push(ballot(3, 1));
        early.push(ballot(4, 1));
        early.push(ballot(4, 2));
        early.push(ballot(6, 1));

        let taken = early.take(4);
        assert_eq!(taken.len(), 2);
        assert_eq!(early.count, 1);
        assert!(early.take(3).is_empty());
        assert_eq!(early.take(6).len(), 1);
        assert_eq!(early.count, 0);
    }
}
