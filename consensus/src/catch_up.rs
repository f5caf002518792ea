//! Peer catch-up: "send me the ballots I'm missing".
//!
//! The requester lists the voters it already holds for one `(round, stage)`;
//! the responder answers with the ballots of every other voter it has.

use std::collections::HashSet;

use palisade_types::ValidatorAddress;
use serde::{Deserialize, Serialize};

use crate::ballot::{Ballot, Stage};
use crate::round::RoundKey;
use crate::session::VotingSession;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpRequest {
    pub height: u64,
    pub round_index: u32,
    pub packing_index: u16,
    pub sub_round: u32,
    pub stage: Stage,
    pub known: Vec<ValidatorAddress>,
}

impl CatchUpRequest {
    /// What this node would ask for, given what it holds right now.
    pub fn for_session(session: &VotingSession, stage: Stage) -> Self {
        let key = session.current_key();
        let known = session
            .current_round()
            .stage(stage)
            .voted()
            .iter()
            .cloned()
            .collect();
        Self {
            height: session.height(),
            round_index: key.round_index,
            packing_index: key.packing_index,
            sub_round: key.sub_round,
            stage,
            known,
        }
    }

    pub fn round_key(&self) -> RoundKey {
        RoundKey {
            round_index: self.round_index,
            packing_index: self.packing_index,
            sub_round: self.sub_round,
        }
    }

    /// Ballots `session` holds that the requester lacks. Empty if the
    /// session is at another height or round.
    pub fn answer(&self, session: &VotingSession) -> Vec<Ballot> {
        if self.height != session.height() {
            return Vec::new();
        }
        let known: HashSet<ValidatorAddress> = self.known.iter().cloned().collect();
        session.missing_ballots(self.round_key(), self.stage, &known)
    }
}
