//! Fundamental types for the Palisade validator node.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: block hashes, validator addresses, network endpoints, key
//! material and timestamps.

pub mod address;
pub mod block;
pub mod keys;
pub mod node_id;
pub mod time;

pub use address::ValidatorAddress;
pub use block::BlockHash;
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use node_id::NodeId;
pub use time::{Clock, SystemClock, Timestamp};
