//! Certificate: quorum-backed proof that a candidate won one stage of one
//! sub-round.
//!
//! The body is shared by every contributing ballot; the signatures are kept
//! in receipt order. On the wire the body is followed by a var-int count and
//! that many length-prefixed signatures.

use std::collections::HashSet;

use palisade_types::{BlockHash, ValidatorAddress};

use crate::ballot::{Ballot, BallotBody, Stage, TargetKey};
use crate::error::ConsensusError;
use crate::round::RoundKey;
use crate::scheme::SignatureScheme;
use crate::wire::{CodecError, Reader, Writer, MAX_CERTIFICATE_SIGNATURES};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    body: BallotBody,
    signatures: Vec<Vec<u8>>,
}

impl Certificate {
    /// Aggregate ballots that share one target and stage.
    pub fn build<'a, I>(ballots: I) -> Result<Self, ConsensusError>
    where
        I: IntoIterator<Item = &'a Ballot>,
    {
        let mut iter = ballots.into_iter();
        let first = iter.next().ok_or(ConsensusError::EmptyQuorum)?;
        let body = *first.body();
        let target = body.target_key();
        let mut signatures = vec![first.signature().to_vec()];

        for ballot in iter {
            if ballot.target_key() != target || ballot.stage() != body.stage {
                return Err(ConsensusError::MixedTargets);
            }
            signatures.push(ballot.signature().to_vec());
        }

        Ok(Self { body, signatures })
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

    pub fn signatures(&self) -> &[Vec<u8>] {
        &self.signatures
    }

    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }

    /// Expand back into the individual ballots it aggregates.
    pub fn ballots(&self) -> impl Iterator<Item = Ballot> + '_ {
        self.signatures
            .iter()
            .map(move |sig| Ballot::new(self.body, sig.clone()))
    }

    /// Check every signature and return the signers in certificate order.
    ///
    /// Fails on a bad signature, a signer outside `validators`, a repeated
    /// signer, or fewer than `quorum` signers.
    pub fn verify(
        &self,
        scheme: &dyn SignatureScheme,
        validators: &[ValidatorAddress],
        quorum: usize,
    ) -> Result<Vec<ValidatorAddress>, ConsensusError> {
        let digest = self.body.digest();
        let mut seen = HashSet::with_capacity(self.signatures.len());
        let mut signers = Vec::with_capacity(self.signatures.len());

        for sig in &self.signatures {
            let signer = scheme.recover(&digest, sig)?;
            if !validators.contains(&signer) {
                return Err(ConsensusError::UnknownValidator(signer));
            }
            if !seen.insert(signer.clone()) {
                return Err(ConsensusError::DuplicateSigner(signer));
            }
            signers.push(signer);
        }

        if signers.len() < quorum {
            return Err(ConsensusError::InsufficientSignatures {
                have: signers.len(),
                need: quorum,
            });
        }
        Ok(signers)
    }

    pub fn encode(&self) -> Vec<u8> {
        let sig_bytes: usize = self.signatures.iter().map(|s| s.len() + 2).sum();
        let mut buf = Vec::with_capacity(BallotBody::ENCODED_LEN + 2 + sig_bytes);
        let mut w = Writer::new(&mut buf);
        self.body.encode_to(&mut w);
        w.var_int(self.signatures.len() as u64);
        for sig in &self.signatures {
            w.length_prefixed(sig);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let body = BallotBody::decode_from(&mut r)?;
        let count = r.length(MAX_CERTIFICATE_SIGNATURES)?;
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            let mut sig = Vec::new();
            r.length_prefixed_into(&mut sig)?;
            signatures.push(sig);
        }
        r.finish()?;
        Ok(Self { body, signatures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{BallotSigner, Ed25519Scheme, KeyPairSigner};

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn signers(n: u8) -> Vec<KeyPairSigner> {
        (1..=n).map(|i| KeyPairSigner::from_seed(&[i; 32])).collect()
    }

    fn body(candidate: BlockHash, stage: Stage) -> BallotBody {
        BallotBody {
            height: 3,
            round_index: 1,
            packing_index: 0,
            round_start_time: 100,
            sub_round: 1,
            stage,
            candidate,
        }
    }

    fn ballots(signers: &[KeyPairSigner], candidate: BlockHash) -> Vec<Ballot> {
        signers
            .iter()
            .map(|s| Ballot::sign(body(candidate, Stage::One), s))
            .collect()
    }

    fn addresses(signers: &[KeyPairSigner]) -> Vec<ValidatorAddress> {
        signers.iter().map(|s| s.address().clone()).collect()
    }

    #[test]
    fn build_keeps_receipt_order() {
        let keys = signers(3);
        let votes = ballots(&keys, make_hash(1));
        let cert = Certificate::build(&votes).unwrap();
        assert_eq!(cert.signer_count(), 3);
        for (sig, ballot) in cert.signatures().iter().zip(&votes) {
            assert_eq!(sig.as_slice(), ballot.signature());
        }
        assert_eq!(cert.candidate(), make_hash(1));
    }

    #[test]
    fn build_from_nothing_fails() {
        let none: Vec<Ballot> = Vec::new();
        assert!(matches!(
            Certificate::build(&none),
            Err(ConsensusError::EmptyQuorum)
        ));
    }

    #[test]
    fn build_rejects_mixed_candidates_and_stages() {
        let keys = signers(2);
        let mut votes = ballots(&keys[..1], make_hash(1));
        votes.push(Ballot::sign(body(make_hash(2), Stage::One), &keys[1]));
        assert!(matches!(
            Certificate::build(&votes),
            Err(ConsensusError::MixedTargets)
        ));

        let mut votes = ballots(&keys[..1], make_hash(1));
        votes.push(Ballot::sign(body(make_hash(1), Stage::Two), &keys[1]));
        assert!(matches!(
            Certificate::build(&votes),
            Err(ConsensusError::MixedTargets)
        ));
    }

    #[test]
    fn verify_accepts_quorum() {
        let keys = signers(4);
        let cert = Certificate::build(&ballots(&keys[..3], make_hash(1))).unwrap();
        let signed_by = cert.verify(&Ed25519Scheme, &addresses(&keys), 3).unwrap();
        assert_eq!(signed_by, addresses(&keys[..3]));
    }

    #[test]
    fn verify_rejects_short_quorum() {
        let keys = signers(4);
        let cert = Certificate::build(&ballots(&keys[..2], make_hash(1))).unwrap();
        assert!(matches!(
            cert.verify(&Ed25519Scheme, &addresses(&keys), 3),
            Err(ConsensusError::InsufficientSignatures { have: 2, need: 3 })
        ));
    }

    #[test]
    fn verify_rejects_outsider_and_repeat() {
        let keys = signers(4);
        let cert = Certificate::build(&ballots(&keys, make_hash(1))).unwrap();
        assert!(matches!(
            cert.verify(&Ed25519Scheme, &addresses(&keys[..3]), 3),
            Err(ConsensusError::UnknownValidator(_))
        ));

        let mut votes = ballots(&keys[..3], make_hash(1));
        votes.push(votes[0].clone());
        let cert = Certificate::build(&votes).unwrap();
        assert!(matches!(
            cert.verify(&Ed25519Scheme, &addresses(&keys), 3),
            Err(ConsensusError::DuplicateSigner(_))
        ));
    }

    #[test]
    fn encode_decode_preserves_certificate() {
        let keys = signers(3);
        let cert = Certificate::build(&ballots(&keys, make_hash(9))).unwrap();
        let bytes = cert.encode();
        let decoded = Certificate::decode(&bytes).unwrap();
        assert_eq!(decoded, cert);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn expands_back_into_ballots() {
        let keys = signers(3);
        let votes = ballots(&keys, make_hash(9));
        let cert = Certificate::build(&votes).unwrap();
        let expanded: Vec<Ballot> = cert.ballots().collect();
        assert_eq!(expanded, votes);
    }
}
