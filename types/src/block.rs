//! Block hash type and the empty-block sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte block hash identifying a candidate block at some height.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl Default for BlockHash {
    fn default() -> Self {
        Self::ZERO
    }
}

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Designated hash voted for when no valid proposal exists for a slot.
    ///
    /// No real block hashes to all zeroes, so the zero hash doubles as the
    /// empty-block sentinel.
    pub const EMPTY_BLOCK: Self = Self::ZERO;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Whether this hash is the empty-block sentinel.
    pub fn is_empty_block(&self) -> bool {
        *self == Self::EMPTY_BLOCK
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty_block() {
            return write!(f, "BlockHash(empty)");
        }
        write!(f, "BlockHash(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
