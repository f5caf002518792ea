use palisade_types::ValidatorAddress;
use thiserror::Error;

use crate::wire::CodecError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("malformed ballot: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed ballot: {0}")]
    MalformedBallot(String),

    #[error("signature does not verify against the ballot digest")]
    InvalidSignature,

    #[error("voter {0} is not in the validator set")]
    UnknownValidator(ValidatorAddress),

    #[error("cannot build a certificate from zero ballots")]
    EmptyQuorum,

    #[error("ballots do not share one target")]
    MixedTargets,

    #[error("certificate signer {0} appears more than once")]
    DuplicateSigner(ValidatorAddress),

    #[error("certificate carries {have} valid signers, quorum is {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("quorum {quorum} does not exceed half of {validators} validators")]
    QuorumPrecondition { quorum: usize, validators: usize },

    #[error("ballot handle is stale")]
    StaleHandle,

    #[error("ballot pool is full ({0} slots)")]
    PoolExhausted(usize),

    #[error("height mismatch: session {expected}, message {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("round {0} is not newer than the current round")]
    RoundNotNewer(String),

    #[error("session for height {0} has already finished")]
    SessionFinished(u64),
}
