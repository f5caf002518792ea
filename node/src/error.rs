use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("consensus error: {0}")]
    Consensus(#[from] palisade_consensus::ConsensusError),

    #[error("network error: {0}")]
    Network(#[from] palisade_network::NetworkError),

    #[error("crypto error: {0}")]
    Crypto(#[from] palisade_crypto::CryptoError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("message codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("logging already initialised: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
