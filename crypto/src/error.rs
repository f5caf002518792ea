use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("sealed payload too short: {0} bytes")]
    SealedTooShort(usize),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed: authentication check failed")]
    Decryption,
}
