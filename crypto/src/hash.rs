//! Blake2b hashing for ballot digests and message deduplication.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash several byte slices as if concatenated.
pub(crate) fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// First 8 bytes of the Blake2b-256 hash of `data`.
///
/// Used only as a replay-suppression key; not a cryptographic commitment.
pub fn short_digest(data: &[u8]) -> [u8; 8] {
    let full = blake2b_256(data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&full[..8]);
    out
}
