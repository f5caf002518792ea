//! Ed25519 key generation and X25519 conversion.

use ed25519_dalek::SigningKey;
use palisade_types::{KeyPair, PrivateKey, PublicKey};
use rand::rngs::OsRng;

/// Generate a new Ed25519 key pair from a secure random source.
pub fn generate_keypair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    PublicKey(SigningKey::from_bytes(&private.0).verifying_key().to_bytes())
}

/// Reconstruct a full key pair from a private key.
pub fn keypair_from_private(private: PrivateKey) -> KeyPair {
    let public = public_from_private(&private);
    KeyPair { public, private }
}

/// Derive a key pair from a 32-byte seed (deterministic).
///
/// Validators load their identity this way from the configured seed.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    keypair_from_private(PrivateKey(*seed))
}

/// Convert an Ed25519 private key (seed) to X25519 scalar bytes.
///
/// The matching X25519 public key is `ed25519_public_to_x25519(&public_key)`,
/// so a validator's overlay sealing key never has to be distributed
/// separately from its signing key.
pub fn ed25519_private_to_x25519(ed25519_private: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(ed25519_private).to_scalar_bytes()
}

/// Convert an Ed25519 public key to its X25519 (Montgomery) equivalent.
///
/// Returns `None` if the public key bytes are not a valid curve point.
pub fn ed25519_public_to_x25519(ed25519_public: &[u8; 32]) -> Option<[u8; 32]> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(ed25519_public).ok()?;
    Some(verifying_key.to_montgomery().to_bytes())
}
