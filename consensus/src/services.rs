//! Collaborators the voting core calls out to.

use palisade_types::{BlockHash, ValidatorAddress};

use crate::ballot::Ballot;
use crate::certificate::Certificate;

/// Block storage. Each confirmed height is delivered exactly once, through
/// one of the two methods.
pub trait BlockService: Send + Sync {
    fn save_confirmed_block(&self, height: u64, hash: BlockHash, certificate: &Certificate) -> bool;
    fn save_empty_block(&self, height: u64, certificate: &Certificate) -> bool;
}

/// Receives proof of double-signing for punishment.
pub trait EvidenceSink: Send + Sync {
    fn report_bifurcation(&self, voter: &ValidatorAddress, first: &Ballot, second: &Ballot);
}

/// The validator set is computed elsewhere; the core only reads it.
pub trait ValidatorSetProvider: Send + Sync {
    fn current_set(&self, height: u64) -> Vec<ValidatorAddress>;
    fn quorum_size(&self, height: u64) -> usize;
}

/// `ceil(ratio_percent * validators / 100)`.
pub fn quorum_size(ratio_percent: u32, validators: usize) -> usize {
    let scaled = ratio_percent as usize * validators;
    scaled.div_ceil(100)
}

/// A validator set that does not change with height.
#[derive(Clone, Debug)]
pub struct StaticValidatorSet {
    validators: Vec<ValidatorAddress>,
    ratio_percent: u32,
}

impl StaticValidatorSet {
    pub fn new(validators: Vec<ValidatorAddress>, ratio_percent: u32) -> Self {
        Self {
            validators,
            ratio_percent,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl ValidatorSetProvider for StaticValidatorSet {
    fn current_set(&self, _height: u64) -> Vec<ValidatorAddress> {
        self.validators.clone()
    }

    fn quorum_size(&self, _height: u64) -> usize {
        quorum_size(self.ratio_percent, self.validators.len())
    }
}
