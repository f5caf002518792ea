//! Ballot: one validator's signed vote for a candidate at a specific
//! (height, round, packing slot, sub-round, stage).
//!
//! Layout on the wire:
//!
//! ```text
//! u64 height | u32 round_index | u16 packing_index | u32 sub_round | u8 stage
//! | [u8; 32] candidate | u32 round_start_time | var-int len | signature
//! ```
//!
//! The signature covers the Blake2b-256 digest of everything before it. The
//! digest and the recovered voter address are memoized.

use std::fmt;
use std::sync::OnceLock;

use palisade_crypto::blake2b_256;
use palisade_types::{BlockHash, ValidatorAddress};
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::round::RoundKey;
use crate::scheme::{BallotSigner, SignatureScheme};
use crate::wire::{CodecError, Reader, Writer};

/// Phase within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Vote on the candidate block itself.
    One,
    /// Vote on the outcome of stage one.
    Two,
}

impl Stage {
    pub fn as_u8(self) -> u8 {
        match self {
            Stage::One => 1,
            Stage::Two => 2,
        }
    }

    pub fn from_u8(byte: u8) -> Result<Self, CodecError> {
        match byte {
            1 => Ok(Stage::One),
            2 => Ok(Stage::Two),
            other => Err(CodecError::InvalidStage(other)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// The signed part of a ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BallotBody {
    pub height: u64,
    pub round_index: u32,
    pub packing_index: u16,
    /// Seconds.
    pub round_start_time: u32,
    /// Starts at 1 and only grows within one height.
    pub sub_round: u32,
    pub stage: Stage,
    pub candidate: BlockHash,
}

impl Default for BallotBody {
    fn default() -> Self {
        Self {
            height: 0,
            round_index: 0,
            packing_index: 0,
            round_start_time: 0,
            sub_round: 1,
            stage: Stage::One,
            candidate: BlockHash::EMPTY_BLOCK,
        }
    }
}

impl BallotBody {
    /// Size of the encoded body, i.e. a ballot without its signature field.
    pub const ENCODED_LEN: usize = 8 + 4 + 2 + 4 + 1 + 32 + 4;

    pub fn round_key(&self) -> RoundKey {
        RoundKey {
            round_index: self.round_index,
            packing_index: self.packing_index,
            sub_round: self.sub_round,
        }
    }

    pub fn target_key(&self) -> TargetKey {
        TargetKey {
            height: self.height,
            round_index: self.round_index,
            packing_index: self.packing_index,
            sub_round: self.sub_round,
            candidate: self.candidate,
        }
    }

    /// Digest over the encoded body. This is what gets signed.
    pub fn digest(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode_to(&mut Writer::new(&mut buf));
        blake2b_256(&buf)
    }

    pub(crate) fn encode_to(&self, w: &mut Writer<'_>) {
        w.u64(self.height);
        w.u32(self.round_index);
        w.u16(self.packing_index);
        w.u32(self.sub_round);
        w.u8(self.stage.as_u8());
        w.bytes(self.candidate.as_bytes());
        w.u32(self.round_start_time);
    }

    pub(crate) fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let height = r.u64()?;
        let round_index = r.u32()?;
        let packing_index = r.u16()?;
        let sub_round = r.u32()?;
        let stage = Stage::from_u8(r.u8()?)?;
        let candidate = BlockHash::new(r.hash()?);
        let round_start_time = r.u32()?;
        Ok(Self {
            height,
            round_index,
            packing_index,
            round_start_time,
            sub_round,
            stage,
            candidate,
        })
    }
}

/// Identifies one voter's position in one exact sub-vote.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub height: u64,
    pub round_start_time: u32,
    pub round_index: u32,
    pub packing_index: u16,
    pub sub_round: u32,
    pub stage: Stage,
    pub voter: ValidatorAddress,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}",
            self.height,
            self.round_start_time,
            self.round_index,
            self.packing_index,
            self.sub_round,
            self.stage,
            self.voter
        )
    }
}

/// Identifies one candidate in one exact sub-vote; the tally key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub height: u64,
    pub round_index: u32,
    pub packing_index: u16,
    pub sub_round: u32,
    pub candidate: BlockHash,
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.height, self.round_index, self.packing_index, self.sub_round, self.candidate
        )
    }
}

/// A signed ballot.
#[derive(Clone, Debug, Default)]
pub struct Ballot {
    body: BallotBody,
    signature: Vec<u8>,
    digest: OnceLock<[u8; 32]>,
    voter: OnceLock<ValidatorAddress>,
}

impl PartialEq for Ballot {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body && self.signature == other.signature
    }
}

impl Eq for Ballot {}

impl Ballot {
    /// Wrap an already-signed body.
    pub fn new(body: BallotBody, signature: Vec<u8>) -> Self {
        Self {
            body,
            signature,
            digest: OnceLock::new(),
            voter: OnceLock::new(),
        }
    }

    /// Sign `body` locally. The voter is known, so it is cached up front.
    pub fn sign(body: BallotBody, signer: &dyn BallotSigner) -> Self {
        let digest = body.digest();
        let ballot = Self::new(body, signer.sign(&digest));
        let _ = ballot.digest.set(digest);
        let _ = ballot.voter.set(signer.address().clone());
        ballot
    }

    pub fn body(&self) -> &BallotBody {
        &self.body
    }

    pub fn height(&self) -> u64 {
        self.body.height
    }

    pub fn stage(&self) -> Stage {
        self.body.stage
    }

    pub fn candidate(&self) -> BlockHash {
        self.body.candidate
    }

    pub fn round_key(&self) -> RoundKey {
        self.body.round_key()
    }

    pub fn target_key(&self) -> TargetKey {
        self.body.target_key()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Memoized digest of the body.
    pub fn digest(&self) -> &[u8; 32] {
        self.digest.get_or_init(|| self.body.digest())
    }

    /// Recover (once) and return the voter address.
    pub fn voter(&self, scheme: &dyn SignatureScheme) -> Result<&ValidatorAddress, ConsensusError> {
        if let Some(voter) = self.voter.get() {
            return Ok(voter);
        }
        let recovered = scheme.recover(self.digest(), &self.signature)?;
        Ok(self.voter.get_or_init(|| recovered))
    }

    /// The voter address if it has already been recovered.
    pub fn cached_voter(&self) -> Option<&ValidatorAddress> {
        self.voter.get()
    }

    pub fn message_key(&self, scheme: &dyn SignatureScheme) -> Result<MessageKey, ConsensusError> {
        let voter = self.voter(scheme)?.clone();
        Ok(MessageKey {
            height: self.body.height,
            round_start_time: self.body.round_start_time,
            round_index: self.body.round_index,
            packing_index: self.body.packing_index,
            sub_round: self.body.sub_round,
            stage: self.body.stage,
            voter,
        })
    }

    pub fn encoded_len(&self) -> usize {
        BallotBody::ENCODED_LEN + var_int_len(self.signature.len() as u64) + self.signature.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        let mut w = Writer::new(&mut buf);
        self.body.encode_to(&mut w);
        w.length_prefixed(&self.signature);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut ballot = Self::default();
        ballot.decode_into(bytes)?;
        Ok(ballot)
    }

    /// Decode over `self`, reusing the signature allocation. On error the
    /// ballot is left cleared.
    pub fn decode_into(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.clear();
        let mut r = Reader::new(bytes);
        let result = BallotBody::decode_from(&mut r).and_then(|body| {
            r.length_prefixed_into(&mut self.signature)?;
            r.finish()?;
            Ok(body)
        });
        match result {
            Ok(body) => {
                self.body = body;
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    /// Reset to the default state, keeping the signature buffer's capacity.
    pub(crate) fn clear(&mut self) {
        self.body = BallotBody::default();
        self.signature.clear();
        self.digest.take();
        self.voter.take();
    }
}

fn var_int_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{Ed25519Scheme, KeyPairSigner};

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn body(candidate: BlockHash) -> BallotBody {
        BallotBody {
            height: 10,
            round_index: 4,
            packing_index: 2,
            round_start_time: 1_700_000_000,
            sub_round: 1,
            stage: Stage::One,
            candidate,
        }
    }

    #[test]
    fn body_encodes_to_fixed_length() {
        let mut buf = Vec::new();
        body(make_hash(1)).encode_to(&mut Writer::new(&mut buf));
        assert_eq!(buf.len(), BallotBody::ENCODED_LEN);
        assert_eq!(&buf[..8], &10u64.to_be_bytes());
        assert_eq!(buf[18], 1, "stage byte follows sub_round");
    }

    #[test]
    fn encode_decode_preserves_bytes() {
        let signer = KeyPairSigner::from_seed(&[7u8; 32]);
        let ballot = Ballot::sign(body(make_hash(3)), &signer);
        let bytes = ballot.encode();
        assert_eq!(bytes.len(), ballot.encoded_len());
        let decoded = Ballot::decode(&bytes).unwrap();
        assert_eq!(decoded, ballot);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn digest_excludes_signature() {
        let a = Ballot::new(body(make_hash(1)), vec![1, 2, 3]);
        let b = Ballot::new(body(make_hash(1)), vec![9, 9]);
        assert_eq!(a.digest(), b.digest());
        let c = Ballot::new(body(make_hash(2)), vec![1, 2, 3]);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn voter_is_recovered_from_signature() {
        let signer = KeyPairSigner::from_seed(&[7u8; 32]);
        let signed = Ballot::sign(body(make_hash(3)), &signer);
        let received = Ballot::decode(&signed.encode()).unwrap();
        assert!(received.cached_voter().is_none());
        let voter = received.voter(&Ed25519Scheme).unwrap();
        assert_eq!(voter, signer.address());
        assert!(received.cached_voter().is_some());
    }

    #[test]
    fn tampered_body_fails_recovery() {
        let signer = KeyPairSigner::from_seed(&[7u8; 32]);
        let signed = Ballot::sign(body(make_hash(3)), &signer);
        let forged = Ballot::new(body(make_hash(4)), signed.signature().to_vec());
        assert!(matches!(
            forged.voter(&Ed25519Scheme),
            Err(ConsensusError::InvalidSignature)
        ));
    }

    #[test]
    fn invalid_stage_byte_rejected() {
        let mut bytes = Ballot::new(body(make_hash(1)), vec![0; 4]).encode();
        bytes[18] = 3;
        assert_eq!(Ballot::decode(&bytes), Err(CodecError::InvalidStage(3)));
    }

    #[test]
    fn padded_signature_length_rejected() {
        let signer = KeyPairSigner::from_seed(&[7u8; 32]);
        let bytes = Ballot::sign(body(make_hash(3)), &signer).encode();
        let at = BallotBody::ENCODED_LEN;
        assert_eq!(bytes[at], 96);

        let mut padded = bytes[..at].to_vec();
        padded.extend_from_slice(&[0xE0, 0x00]);
        padded.extend_from_slice(&bytes[at + 1..]);
        assert_eq!(Ballot::decode(&padded), Err(CodecError::NonCanonicalVarInt));
    }

    #[test]
    fn truncated_ballot_rejected() {
        let bytes = Ballot::new(body(make_hash(1)), vec![5; 10]).encode();
        assert!(Ballot::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(Ballot::decode(&bytes[..20]).is_err());
    }

    #[test]
    fn decode_into_resets_cached_fields() {
        let signer = KeyPairSigner::from_seed(&[7u8; 32]);
        let first = Ballot::sign(body(make_hash(1)), &signer);
        let other = KeyPairSigner::from_seed(&[8u8; 32]);
        let second = Ballot::sign(body(make_hash(2)), &other);

        let mut slot = first.clone();
        slot.decode_into(&second.encode()).unwrap();
        assert!(slot.cached_voter().is_none());
        assert_eq!(slot.voter(&Ed25519Scheme).unwrap(), other.address());
        assert_eq!(slot.digest(), second.digest());
    }

    #[test]
    fn keys_render_pipe_joined() {
        let signer = KeyPairSigner::from_seed(&[7u8; 32]);
        let ballot = Ballot::sign(body(make_hash(0xAB)), &signer);
        let key = ballot.message_key(&Ed25519Scheme).unwrap();
        assert_eq!(
            key.to_string(),
            format!("10|1700000000|4|2|1|1|{}", signer.address())
        );
        let target = ballot.target_key().to_string();
        assert!(target.starts_with("10|4|2|1|abab"));
    }
}
