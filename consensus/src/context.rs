//! Per-chain context handed to every voting session.
//!
//! Holds what would otherwise be process-wide: the voting parameters, the
//! signature scheme and the validator set source. Independent contexts can
//! run side by side (several chains, several in-process validators in tests).

use std::sync::Arc;

use crate::config::VotingConfig;
use crate::scheme::{Ed25519Scheme, SignatureScheme};
use crate::services::ValidatorSetProvider;

#[derive(Clone)]
pub struct ConsensusContext {
    pub config: VotingConfig,
    pub scheme: Arc<dyn SignatureScheme>,
    pub validators: Arc<dyn ValidatorSetProvider>,
}

impl ConsensusContext {
    pub fn new(
        config: VotingConfig,
        scheme: Arc<dyn SignatureScheme>,
        validators: Arc<dyn ValidatorSetProvider>,
    ) -> Self {
        Self {
            config,
            scheme,
            validators,
        }
    }

    /// Context using the Ed25519 ballot scheme.
    pub fn ed25519(config: VotingConfig, validators: Arc<dyn ValidatorSetProvider>) -> Self {
        Self::new(config, Arc::new(Ed25519Scheme), validators)
    }
}
