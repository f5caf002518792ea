//! Signature scheme seam.
//!
//! The voting core treats signing and voter recovery as opaque operations.
//! `Ed25519Scheme` is the production scheme: a ballot signature is the
//! signer's public key followed by the Ed25519 signature over the digest,
//! and the voter address is derived from the embedded key once it verifies.

use palisade_crypto::{derive_address, keypair_from_seed, sign_message, verify_signature};
use palisade_types::{KeyPair, PublicKey, Signature, ValidatorAddress};

use crate::error::ConsensusError;

/// Recovers the signer of a digest.
pub trait SignatureScheme: Send + Sync {
    /// Fails with `InvalidSignature` if `signature` does not verify over `digest`.
    fn recover(&self, digest: &[u8; 32], signature: &[u8]) -> Result<ValidatorAddress, ConsensusError>;
}

/// Produces signatures for locally cast ballots.
pub trait BallotSigner: Send + Sync {
    fn address(&self) -> &ValidatorAddress;
    fn sign(&self, digest: &[u8; 32]) -> Vec<u8>;
}

pub const ED25519_BALLOT_SIGNATURE_LEN: usize = 32 + 64;

#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn recover(&self, digest: &[u8; 32], signature: &[u8]) -> Result<ValidatorAddress, ConsensusError> {
        if signature.len() != ED25519_BALLOT_SIGNATURE_LEN {
            return Err(ConsensusError::MalformedBallot(format!(
                "signature is {} bytes, expected {}",
                signature.len(),
                ED25519_BALLOT_SIGNATURE_LEN
            )));
        }
        let (key_bytes, sig_bytes) = signature.split_at(32);
        let public = PublicKey::from_slice(key_bytes).ok_or(ConsensusError::InvalidSignature)?;
        let sig = Signature::from_slice(sig_bytes).ok_or(ConsensusError::InvalidSignature)?;
        if !verify_signature(digest, &sig, &public) {
            return Err(ConsensusError::InvalidSignature);
        }
        Ok(derive_address(&public))
    }
}

/// Signs with a local Ed25519 key pair.
pub struct KeyPairSigner {
    keys: KeyPair,
    address: ValidatorAddress,
}

impl KeyPairSigner {
    pub fn new(keys: KeyPair) -> Self {
        let address = derive_address(&keys.public);
        Self { keys, address }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(keypair_from_seed(seed))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keys.public
    }
}

impl BallotSigner for KeyPairSigner {
    fn address(&self) -> &ValidatorAddress {
        &self.address
    }

    fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        let signature = sign_message(digest, &self.keys.private);
        let mut out = Vec::with_capacity(ED25519_BALLOT_SIGNATURE_LEN);
        out.extend_from_slice(self.keys.public.as_bytes());
        out.extend_from_slice(signature.as_bytes());
        out
    }
}
