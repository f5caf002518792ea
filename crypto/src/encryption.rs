//! Sealing of overlay payloads to a single recipient validator.
//!
//! X25519 Diffie-Hellman between the sender's and the recipient's keys
//! (both derived from their Ed25519 identities) yields a symmetric key for
//! ChaCha20-Poly1305. A fresh random nonce is drawn per payload and
//! prefixed to the ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::CryptoError;

const NONCE_LEN: usize = 12;
const KEY_CONTEXT: &[u8] = b"palisade-overlay-identity";

fn cipher_for(secret: &[u8; 32], peer_public: &[u8; 32]) -> ChaCha20Poly1305 {
    let secret = StaticSecret::from(*secret);
    let shared = secret.diffie_hellman(&X25519Public::from(*peer_public));
    let sym_key = crate::hash::blake2b_256_multi(&[shared.as_bytes(), KEY_CONTEXT]);
    ChaCha20Poly1305::new(&sym_key.into())
}

/// Seal `plaintext` so that only the holder of the recipient's X25519
/// secret can open it.
///
/// Output layout: `nonce(12) ‖ ciphertext ‖ tag(16)`.
pub fn seal_for(
    plaintext: &[u8],
    recipient_x25519_public: &[u8; 32],
    sender_x25519_secret: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(sender_x25519_secret, recipient_x25519_public);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a payload sealed with [`seal_for`].
pub fn open_from(
    sealed: &[u8],
    sender_x25519_public: &[u8; 32],
    recipient_x25519_secret: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::SealedTooShort(sealed.len()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);

    cipher_for(recipient_x25519_secret, sender_x25519_public)
        .decrypt(&Nonce::from(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_of(secret: [u8; 32]) -> [u8; 32] {
        *X25519Public::from(&StaticSecret::from(secret)).as_bytes()
    }

    #[test]
    fn seal_open_roundtrip() {
        let sender_secret = [1u8; 32];
        let recipient_secret = [2u8; 32];

        let sealed = seal_for(b"pal_node|10.0.0.1:9000", &public_of(recipient_secret), &sender_secret)
            .unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 22 + 16);

        let opened = open_from(&sealed, &public_of(sender_secret), &recipient_secret).unwrap();
        assert_eq!(opened, b"pal_node|10.0.0.1:9000");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let recipient = public_of([2u8; 32]);
        let a = seal_for(b"same", &recipient, &[1u8; 32]).unwrap();
        let b = seal_for(b"same", &recipient, &[1u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_recipient_fails_authentication() {
        let sealed = seal_for(b"identity", &public_of([2u8; 32]), &[1u8; 32]).unwrap();
        let result = open_from(&sealed, &public_of([1u8; 32]), &[3u8; 32]);
        assert_eq!(result, Err(CryptoError::Decryption));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let mut sealed = seal_for(b"identity", &public_of([2u8; 32]), &[1u8; 32]).unwrap();
        sealed[NONCE_LEN] ^= 0xFF;
        let result = open_from(&sealed, &public_of([1u8; 32]), &[2u8; 32]);
        assert_eq!(result, Err(CryptoError::Decryption));
    }

    #[test]
    fn truncated_payload_rejected() {
        let result = open_from(&[0u8; 5], &public_of([1u8; 32]), &[2u8; 32]);
        assert_eq!(result, Err(CryptoError::SealedTooShort(5)));
    }
}
