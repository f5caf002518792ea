//! Prometheus metrics for the voting core.
//!
//! [`ConsensusMetrics`] owns a dedicated [`Registry`]; [`ConsensusMetrics::encode_text`]
//! renders it in the Prometheus text exposition format.

use palisade_consensus::{ReceiveOutcome, SessionEvent, SessionOutcome};
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

use crate::NodeError;

pub struct ConsensusMetrics {
    registry: Registry,

    // -- Counters ----------------------------------------------------------------
    pub ballots_received: IntCounter,
    pub ballots_accepted: IntCounter,
    pub ballots_duplicate: IntCounter,
    pub ballots_stale: IntCounter,
    pub ballots_cached: IntCounter,
    /// Undecodable, badly signed or from outside the validator set.
    pub ballots_rejected: IntCounter,
    /// Held for a height the node has not started.
    pub ballots_early: IntCounter,
    /// Consensus payloads dropped by the duplicate suppressor.
    pub messages_suppressed: IntCounter,
    pub certificates_built: IntCounter,
    pub escalations: IntCounter,
    pub bifurcations: IntCounter,
    pub confirmed_heights: IntCounter,
    pub empty_heights: IntCounter,
    pub overlay_auth_failures: IntCounter,

    // -- Gauges ------------------------------------------------------------------
    pub connected_validators: IntGauge,
    pub current_height: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, NodeError> {
    Ok(register_int_counter_with_registry!(Opts::new(name, help), registry)?)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, NodeError> {
    Ok(register_int_gauge_with_registry!(Opts::new(name, help), registry)?)
}

impl ConsensusMetrics {
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();
        let r = &registry;
        Ok(Self {
            ballots_received: counter(r, "palisade_ballots_received_total", "Ballots received from peers")?,
            ballots_accepted: counter(r, "palisade_ballots_accepted_total", "Ballots tallied")?,
            ballots_duplicate: counter(r, "palisade_ballots_duplicate_total", "Ballots from voters already counted")?,
            ballots_stale: counter(r, "palisade_ballots_stale_total", "Ballots for rounds already left")?,
            ballots_cached: counter(r, "palisade_ballots_cached_total", "Ballots held for future rounds")?,
            ballots_rejected: counter(r, "palisade_ballots_rejected_total", "Ballots failing decode or validation")?,
            ballots_early: counter(r, "palisade_ballots_early_total", "Ballots buffered for a later height")?,
            messages_suppressed: counter(r, "palisade_messages_suppressed_total", "Replayed consensus messages dropped")?,
            certificates_built: counter(r, "palisade_certificates_built_total", "Certificates built from local tallies")?,
            escalations: counter(r, "palisade_escalations_total", "Sub-round escalations after a stage timeout")?,
            bifurcations: counter(r, "palisade_bifurcations_total", "Double-signing evidence reported")?,
            confirmed_heights: counter(r, "palisade_confirmed_heights_total", "Heights confirmed with a block")?,
            empty_heights: counter(r, "palisade_empty_heights_total", "Heights confirmed empty")?,
            overlay_auth_failures: counter(r, "palisade_overlay_auth_failures_total", "Overlay frames failing authentication")?,
            connected_validators: gauge(r, "palisade_connected_validators", "Validators connected over the overlay")?,
            current_height: gauge(r, "palisade_current_height", "Height currently being voted on")?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count the result of routing one inbound ballot.
    pub fn record_receive(&self, outcome: ReceiveOutcome) {
        match outcome {
            ReceiveOutcome::Accepted | ReceiveOutcome::Certified(_) => self.ballots_accepted.inc(),
            ReceiveOutcome::Duplicate | ReceiveOutcome::Audited => self.ballots_duplicate.inc(),
            ReceiveOutcome::Stale | ReceiveOutcome::Dropped => self.ballots_stale.inc(),
            ReceiveOutcome::Cached => self.ballots_cached.inc(),
        }
    }

    pub fn record_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Certified { local: true, .. } => self.certificates_built.inc(),
            SessionEvent::Certified { local: false, .. } => {}
            SessionEvent::Escalated { .. } => self.escalations.inc(),
            SessionEvent::Confirmed(SessionOutcome::ConfirmedEmpty { .. }) => self.empty_heights.inc(),
            SessionEvent::Confirmed(_) => self.confirmed_heights.inc(),
            SessionEvent::Bifurcation(_) => self.bifurcations.inc(),
        }
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| NodeError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_consensus::{RoundKey, Stage};

    #[test]
    fn encodes_registered_metrics() {
        let metrics = ConsensusMetrics::new().unwrap();
        metrics.ballots_received.inc();
        metrics.current_height.set(12);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("palisade_ballots_received_total 1"));
        assert!(text.contains("palisade_current_height 12"));
        assert!(text.contains("palisade_overlay_auth_failures_total 0"));
    }

    #[test]
    fn receive_outcomes_map_to_counters() {
        let metrics = ConsensusMetrics::new().unwrap();
        metrics.record_receive(ReceiveOutcome::Accepted);
        metrics.record_receive(ReceiveOutcome::Certified(Stage::One));
        metrics.record_receive(ReceiveOutcome::Cached);
        metrics.record_receive(ReceiveOutcome::Audited);

        assert_eq!(metrics.ballots_accepted.get(), 2);
        assert_eq!(metrics.ballots_cached.get(), 1);
        assert_eq!(metrics.ballots_duplicate.get(), 1);
        assert_eq!(metrics.ballots_stale.get(), 0);
    }

    #[test]
    fn escalation_events_are_counted() {
        let metrics = ConsensusMetrics::new().unwrap();
        let from = RoundKey::first(2, 1);
        metrics.record_event(&SessionEvent::Escalated {
            from,
            to: from.next_sub_round(),
        });
        assert_eq!(metrics.escalations.get(), 1);
    }
}
