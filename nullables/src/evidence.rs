//! Nullable evidence sink: collects bifurcation reports.

use std::sync::{Mutex, PoisonError};

use palisade_consensus::{Ballot, EvidenceSink};
use palisade_types::{BlockHash, ValidatorAddress};

/// One reported double-signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub voter: ValidatorAddress,
    pub height: u64,
    pub first: BlockHash,
    pub second: BlockHash,
}

#[derive(Default)]
pub struct NullEvidenceSink {
    reports: Mutex<Vec<Report>>,
}

impl NullEvidenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EvidenceSink for NullEvidenceSink {
    fn report_bifurcation(&self, voter: &ValidatorAddress, first: &Ballot, second: &Ballot) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Report {
                voter: voter.clone(),
                height: first.body().height,
                first: first.body().candidate,
                second: second.body().candidate,
            });
    }
}
