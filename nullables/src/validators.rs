//! Nullable validator set: deterministic keys for N validators.

use std::sync::Arc;

use palisade_consensus::{BallotSigner, KeyPairSigner, StaticValidatorSet};
use palisade_types::{PublicKey, ValidatorAddress};

/// `count` validators whose keys derive from fixed seeds, so every test run
/// (and every in-process node) agrees on the same set.
pub struct NullValidators {
    seeds: Vec<[u8; 32]>,
    signers: Vec<Arc<KeyPairSigner>>,
    ratio_percent: u32,
}

impl NullValidators {
    pub fn new(count: usize, ratio_percent: u32) -> Self {
        let seeds: Vec<[u8; 32]> = (0..count)
            .map(|i| {
                let mut seed = [0x5A; 32];
                seed[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                seed
            })
            .collect();
        let signers = seeds
            .iter()
            .map(|seed| Arc::new(KeyPairSigner::from_seed(seed)))
            .collect();
        Self {
            seeds,
            signers,
            ratio_percent,
        }
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn seed(&self, index: usize) -> [u8; 32] {
        self.seeds[index]
    }

    pub fn signer(&self, index: usize) -> Arc<KeyPairSigner> {
        self.signers[index].clone()
    }

    pub fn address(&self, index: usize) -> ValidatorAddress {
        self.signers[index].address().clone()
    }

    pub fn addresses(&self) -> Vec<ValidatorAddress> {
        self.signers.iter().map(|s| s.address().clone()).collect()
    }

    /// `(address, public key)` pairs, the shape overlay membership is seeded with.
    pub fn entries(&self) -> Vec<(ValidatorAddress, PublicKey)> {
        self.signers
            .iter()
            .map(|s| (s.address().clone(), *s.public_key()))
            .collect()
    }

    pub fn set(&self) -> Arc<StaticValidatorSet> {
        Arc::new(StaticValidatorSet::new(self.addresses(), self.ratio_percent))
    }
}
