use palisade_types::ValidatorAddress;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("frame encode failed: {0}")]
    Encode(String),

    #[error("overlay authentication failed: {0}")]
    OverlayAuthFailure(String),

    #[error("{0} is not in the validator set")]
    NotValidator(ValidatorAddress),

    #[error("frame timestamp skewed by {skew_secs}s")]
    ClockSkew { skew_secs: u64 },

    #[error("crypto error: {0}")]
    Crypto(#[from] palisade_crypto::CryptoError),
}

impl From<bincode::Error> for NetworkError {
    fn from(err: bincode::Error) -> Self {
        NetworkError::Decode(err.to_string())
    }
}
