//! Voting parameters. These are deployment choices, not protocol constants;
//! the defaults only make a fresh node usable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The `[voting]` table of the node configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingConfig {
    /// How long after the round start to wait for a proposal before voting
    /// for the empty block.
    #[serde(default = "default_proposal_timeout_ms")]
    pub proposal_timeout_ms: u64,

    /// Deadline for one stage to reach quorum before escalating.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,

    /// Ask peers for missing ballots after this long without quorum.
    #[serde(default = "default_catch_up_after_ms")]
    pub catch_up_after_ms: u64,

    /// Quorum as a percentage of the validator set, rounded up.
    #[serde(default = "default_byzantine_ratio_percent")]
    pub byzantine_ratio_percent: u32,

    /// Distinct future round keys held per session.
    #[serde(default = "default_future_round_capacity")]
    pub future_round_capacity: usize,

    /// Ballots held per future round key.
    #[serde(default = "default_future_ballots_per_round")]
    pub future_ballots_per_round: usize,

    /// Ballot slots per session.
    #[serde(default = "default_ballot_pool_capacity")]
    pub ballot_pool_capacity: usize,
}

fn default_proposal_timeout_ms() -> u64 {
    2_000
}

fn default_stage_timeout_ms() -> u64 {
    3_000
}

fn default_catch_up_after_ms() -> u64 {
    1_000
}

fn default_byzantine_ratio_percent() -> u32 {
    67
}

fn default_future_round_capacity() -> usize {
    16
}

fn default_future_ballots_per_round() -> usize {
    512
}

fn default_ballot_pool_capacity() -> usize {
    8_192
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            proposal_timeout_ms: default_proposal_timeout_ms(),
            stage_timeout_ms: default_stage_timeout_ms(),
            catch_up_after_ms: default_catch_up_after_ms(),
            byzantine_ratio_percent: default_byzantine_ratio_percent(),
            future_round_capacity: default_future_round_capacity(),
            future_ballots_per_round: default_future_ballots_per_round(),
            ballot_pool_capacity: default_ballot_pool_capacity(),
        }
    }
}

impl VotingConfig {
    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn catch_up_after(&self) -> Duration {
        Duration::from_millis(self.catch_up_after_ms)
    }
}
