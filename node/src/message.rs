//! Consensus message envelope carried inside overlay `Consensus` frames.
//!
//! Ballots and certificates keep their own fixed binary layout; the
//! envelope only tags them, bincode-encoded like the rest of the node's
//! wire traffic.

use palisade_consensus::{Ballot, CatchUpRequest, Certificate, Outbound};
use serde::{Deserialize, Serialize};

use crate::NodeError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// An encoded [`Ballot`].
    Ballot(Vec<u8>),
    /// An encoded [`Certificate`].
    Certificate(Vec<u8>),
    CatchUpRequest(CatchUpRequest),
    /// Encoded ballots answering a catch-up request.
    CatchUpResponse(Vec<Vec<u8>>),
}

impl ConsensusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Ballot(_) => "ballot",
            ConsensusMessage::Certificate(_) => "certificate",
            ConsensusMessage::CatchUpRequest(_) => "catch_up_request",
            ConsensusMessage::CatchUpResponse(_) => "catch_up_response",
        }
    }

    pub fn catch_up_response(ballots: &[Ballot]) -> Self {
        ConsensusMessage::CatchUpResponse(ballots.iter().map(Ballot::encode).collect())
    }

    pub fn encode(&self) -> Result<Vec<u8>, NodeError> {
        bincode::serialize(self).map_err(|e| NodeError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        bincode::deserialize(bytes).map_err(|e| NodeError::Codec(e.to_string()))
    }
}

impl From<&Outbound> for ConsensusMessage {
    fn from(outbound: &Outbound) -> Self {
        match outbound {
            Outbound::Ballot(ballot) => ConsensusMessage::Ballot(ballot.encode()),
            Outbound::Certificate(certificate) => ConsensusMessage::Certificate(certificate.encode()),
            Outbound::CatchUp(request) => ConsensusMessage::CatchUpRequest(request.clone()),
        }
    }
}

/// Decode every ballot of a catch-up response, skipping malformed entries.
pub fn decode_ballots(encoded: &[Vec<u8>]) -> Vec<Ballot> {
    encoded
        .iter()
        .filter_map(|bytes| match Ballot::decode(bytes) {
            Ok(ballot) => Some(ballot),
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed ballot in catch-up response");
                None
            }
        })
        .collect()
}

/// Decode a certificate payload.
pub fn decode_certificate(bytes: &[u8]) -> Result<Certificate, NodeError> {
    Certificate::decode(bytes).map_err(|e| NodeError::Consensus(e.into()))
}
