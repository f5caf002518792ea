//! Nullable block storage: remembers what was confirmed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use palisade_consensus::{BlockService, Certificate};
use palisade_types::BlockHash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedBlock {
    pub height: u64,
    /// `None` for an empty block.
    pub hash: Option<BlockHash>,
    pub signers: usize,
}

/// A [`BlockService`] that records every save and accepts them unless told
/// to refuse.
#[derive(Default)]
pub struct NullBlockService {
    saved: Mutex<Vec<SavedBlock>>,
    refuse: AtomicBool,
}

impl NullBlockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_saves(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<SavedBlock> {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn saved_heights(&self) -> Vec<u64> {
        self.saved().iter().map(|b| b.height).collect()
    }

    fn record(&self, block: SavedBlock) -> bool {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).push(block);
        !self.refuse.load(Ordering::SeqCst)
    }
}

impl BlockService for NullBlockService {
    fn save_confirmed_block(&self, height: u64, hash: BlockHash, certificate: &Certificate) -> bool {
        self.record(SavedBlock {
            height,
            hash: Some(hash),
            signers: certificate.signer_count(),
        })
    }

    fn save_empty_block(&self, height: u64, certificate: &Certificate) -> bool {
        self.record(SavedBlock {
            height,
            hash: None,
            signers: certificate.signer_count(),
        })
    }
}
