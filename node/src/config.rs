//! Node configuration with TOML file support.

use std::collections::HashSet;
use std::path::Path;

use palisade_consensus::{quorum_size, VotingConfig};
use palisade_crypto::{decode_address, derive_address};
use palisade_network::{DedupConfig, OverlayConfig};
use palisade_types::{NodeId, PublicKey, ValidatorAddress};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::NodeError;

/// One member of the validator set as written in the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    pub address: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
}

impl ValidatorEntry {
    /// Build an entry for `public_key`, deriving its address.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self {
            address: derive_address(public_key).to_string(),
            public_key: hex::encode(public_key.as_bytes()),
        }
    }

    /// Decode the entry, checking the address checksum and that the
    /// address belongs to the key.
    pub fn parse(&self) -> Result<(ValidatorAddress, PublicKey), NodeError> {
        let embedded = decode_address(&self.address)
            .map_err(|e| NodeError::Config(format!("validator {}: {e}", self.address)))?;
        let address = ValidatorAddress::parse(self.address.as_str())
            .ok_or_else(|| NodeError::Config(format!("malformed validator address {}", self.address)))?;
        let bytes = hex::decode(&self.public_key)
            .map_err(|e| NodeError::Config(format!("validator {}: public key: {e}", self.address)))?;
        let public_key = PublicKey::from_slice(&bytes)
            .ok_or_else(|| NodeError::Config(format!("validator {}: public key must be 32 bytes", self.address)))?;
        if embedded != public_key {
            return Err(NodeError::Config(format!(
                "validator {} does not match its public key",
                self.address
            )));
        }
        Ok((address, public_key))
    }
}

/// Configuration for a Palisade validator node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Endpoint other validators dial to reach this node.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Hex-encoded 32-byte Ed25519 seed of this validator's key.
    #[serde(default)]
    pub validator_seed: Option<String>,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,

    /// Capacity of the outbound consensus queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Ballots held for heights the node has not started yet.
    #[serde(default = "default_early_ballot_limit")]
    pub early_ballot_limit: usize,

    /// Heights above the started one whose ballots are held.
    #[serde(default = "default_early_height_window")]
    pub early_height_window: u64,

    /// Seconds between overlay maintenance passes.
    #[serde(default = "default_maintain_interval_secs")]
    pub maintain_interval_secs: u64,

    #[serde(default)]
    pub voting: VotingConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub overlay: OverlayConfig,

    #[serde(default)]
    pub validators: Vec<ValidatorEntry>,
}

// -- Serde default helpers -------------------------------------------------------

fn default_node_id() -> String {
    "127.0.0.1:7075".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_outbound_queue() -> usize {
    1024
}

fn default_early_ballot_limit() -> usize {
    1024
}

fn default_early_height_window() -> u64 {
    4
}

fn default_maintain_interval_secs() -> u64 {
    10
}

// -- Impl ------------------------------------------------------------------------

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    /// Install the global tracing subscriber from `log_format` and `log_level`.
    pub fn init_logging(&self) -> Result<(), NodeError> {
        crate::logging::init_logging(self.log_format, &self.log_level)
    }

    /// The decoded validator seed.
    pub fn validator_seed_bytes(&self) -> Result<[u8; 32], NodeError> {
        let raw = self
            .validator_seed
            .as_deref()
            .ok_or_else(|| NodeError::Config("validator_seed is not set".into()))?;
        let bytes = hex::decode(raw).map_err(|e| NodeError::Config(format!("validator_seed: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| NodeError::Config("validator_seed must be 32 bytes".into()))
    }

    /// The decoded validator set, in file order.
    pub fn validator_entries(&self) -> Result<Vec<(ValidatorAddress, PublicKey)>, NodeError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.validators.len());
        for entry in &self.validators {
            let (address, key) = entry.parse()?;
            if !seen.insert(address.clone()) {
                return Err(NodeError::Config(format!("validator {address} listed twice")));
            }
            entries.push((address, key));
        }
        Ok(entries)
    }

    /// Reject configurations the voting core cannot run safely with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_id.trim().is_empty() {
            return Err(NodeError::Config("node_id must not be empty".into()));
        }
        if self.validator_seed.is_some() {
            self.validator_seed_bytes()?;
        }

        let voting = &self.voting;
        if voting.byzantine_ratio_percent == 0 || voting.byzantine_ratio_percent > 100 {
            return Err(NodeError::Config(format!(
                "byzantine_ratio_percent must be in 1..=100, got {}",
                voting.byzantine_ratio_percent
            )));
        }
        if voting.stage_timeout_ms == 0 {
            return Err(NodeError::Config("stage_timeout_ms must be positive".into()));
        }
        if voting.ballot_pool_capacity == 0 {
            return Err(NodeError::Config("ballot_pool_capacity must be positive".into()));
        }

        let validators = self.validator_entries()?.len();
        if validators > 0 {
            let quorum = quorum_size(voting.byzantine_ratio_percent, validators);
            if quorum == 0 || quorum > validators || 2 * quorum <= validators {
                return Err(NodeError::Config(format!(
                    "byzantine_ratio_percent {} gives quorum {quorum} of {validators}; \
                     need 2 x quorum > validators",
                    voting.byzantine_ratio_percent
                )));
            }
        }

        if self.dedup.high_water_mark == 0 || self.dedup.hard_cap < self.dedup.high_water_mark {
            return Err(NodeError::Config(format!(
                "dedup needs 0 < high_water_mark <= hard_cap, got {} / {}",
                self.dedup.high_water_mark, self.dedup.hard_cap
            )));
        }
        if self.outbound_queue == 0 {
            return Err(NodeError::Config("outbound_queue must be positive".into()));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            validator_seed: None,
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            enable_metrics: false,
            outbound_queue: default_outbound_queue(),
            early_ballot_limit: default_early_ballot_limit(),
            early_height_window: default_early_height_window(),
            maintain_interval_secs: default_maintain_interval_secs(),
            voting: VotingConfig::default(),
            dedup: DedupConfig::default(),
            overlay: OverlayConfig::default(),
            validators: Vec::new(),
        }
    }
}
