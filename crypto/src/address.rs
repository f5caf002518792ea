//! Validator address derivation from public keys.
//!
//! Address format: `pal_` + base32(public_key, 52 chars) + base32(checksum, 8 chars)
//!
//! Checksum: first 5 bytes of Blake2b-256(public_key).
//! Base32 alphabet: `13456789abcdefghijkmnopqrstuwxyz` (avoids ambiguous chars).

use palisade_types::{PublicKey, ValidatorAddress};

use crate::CryptoError;

const BASE32_ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

/// ASCII byte → 5-bit value (0xFF = not in the alphabet).
const BASE32_DECODE: [u8; 128] = {
    let mut table = [0xFFu8; 128];
    let mut i = 0;
    while i < 32 {
        table[BASE32_ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

const PUBKEY_CHARS: usize = 52;
const CHECKSUM_CHARS: usize = 8;
const CHECKSUM_LEN: usize = 5;

fn encode_base32(bytes: &[u8], out: &mut String) {
    let mut acc: u64 = 0;
    let mut bits = 0;
    for &byte in bytes {
        acc = (acc << 8) | byte as u64;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((acc >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((acc << (5 - bits)) & 0x1F) as usize] as char);
    }
}

fn decode_base32<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut acc: u64 = 0;
    let mut bits = 0;
    let mut out = [0u8; N];
    let mut pos = 0;
    for c in s.bytes() {
        let val = *BASE32_DECODE.get(c as usize)?;
        if val == 0xFF {
            return None;
        }
        acc = (acc << 5) | val as u64;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            if pos < N {
                out[pos] = (acc >> bits) as u8;
                pos += 1;
            }
        }
    }
    (pos == N).then_some(out)
}

fn checksum(public_key: &[u8; 32]) -> [u8; CHECKSUM_LEN] {
    let hash = crate::blake2b_256(public_key);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash[..CHECKSUM_LEN]);
    out
}

/// Derive the `pal_`-prefixed address of a validator from its public key.
pub fn derive_address(public_key: &PublicKey) -> ValidatorAddress {
    let mut raw = String::with_capacity(ValidatorAddress::PREFIX.len() + PUBKEY_CHARS + CHECKSUM_CHARS);
    raw.push_str(ValidatorAddress::PREFIX);
    encode_base32(public_key.as_bytes(), &mut raw);
    encode_base32(&checksum(public_key.as_bytes()), &mut raw);
    ValidatorAddress::new(raw)
}

/// Recover the public key embedded in an address, checking its checksum.
pub fn decode_address(address: &str) -> Result<PublicKey, CryptoError> {
    let malformed = || CryptoError::MalformedAddress(address.to_owned());

    let encoded = address
        .strip_prefix(ValidatorAddress::PREFIX)
        .ok_or_else(malformed)?;
    if encoded.len() != PUBKEY_CHARS + CHECKSUM_CHARS || !encoded.is_ascii() {
        return Err(malformed());
    }
    let (key_part, checksum_part) = encoded.split_at(PUBKEY_CHARS);

    let key: [u8; 32] = decode_base32(key_part).ok_or_else(malformed)?;
    let sum: [u8; CHECKSUM_LEN] = decode_base32(checksum_part).ok_or_else(malformed)?;
    if sum != checksum(&key) {
        return Err(malformed());
    }
    Ok(PublicKey(key))
}
