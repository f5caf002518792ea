//! Cryptographic primitives for Palisade validators.
//!
//! - **Ed25519** for ballot and overlay message signatures
//! - **Blake2b** for ballot digests and message deduplication digests
//! - **X25519 + ChaCha20-Poly1305** for sealing identity payloads to a
//!   single recipient validator
//! - Address derivation with `pal_` prefix and base32 encoding

pub mod address;
pub mod encryption;
pub mod error;
pub mod hash;
pub mod keys;
pub mod sign;

pub use address::{decode_address, derive_address};
pub use encryption::{open_from, seal_for};
pub use error::CryptoError;
pub use hash::{blake2b_256, short_digest};
pub use keys::{
    ed25519_private_to_x25519, ed25519_public_to_x25519, generate_keypair, keypair_from_private,
    keypair_from_seed, public_from_private,
};
pub use sign::{sign_message, verify_signature};
