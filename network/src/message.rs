//! Frames carried on the validator mesh.
//!
//! Every frame is a bincode-encoded [`WireFrame`]. Overlay control frames are
//! signed by the sending validator over `(sender, timestamp, body)`; consensus
//! payloads are opaque here and authenticated by the ballot layer.

use palisade_crypto::{derive_address, sign_message, verify_signature};
use palisade_types::{KeyPair, NodeId, PublicKey, Signature, Timestamp, ValidatorAddress};
use serde::{Deserialize, Serialize};

use crate::membership::ShareEntry;
use crate::NetworkError;

/// Frames larger than this are rejected before decoding.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Top-level envelope on a validator connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFrame {
    Overlay(SignedFrame),
    Consensus(Vec<u8>),
}

impl WireFrame {
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        bincode::serialize(self).map_err(|e| NetworkError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(NetworkError::Decode(format!(
                "frame of {} bytes exceeds {MAX_FRAME_LEN}",
                bytes.len()
            )));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Overlay control messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayBody {
    /// The sender's endpoint, sealed so only `recipient` can read it.
    Identity {
        recipient: ValidatorAddress,
        sealed: Vec<u8>,
        /// Set on the answer to an Identity so it is not answered again.
        reply: bool,
    },
    /// Validators the sender is connected to.
    Share { peers: Vec<ShareEntry> },
    /// The sender is leaving the mesh.
    Disconnect,
}

impl OverlayBody {
    pub fn kind(&self) -> &'static str {
        match self {
            OverlayBody::Identity { .. } => "identity",
            OverlayBody::Share { .. } => "share",
            OverlayBody::Disconnect => "disconnect",
        }
    }
}

/// Cleartext of an Identity frame's sealed payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPayload {
    pub address: ValidatorAddress,
    pub node_id: NodeId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFrame {
    pub sender: PublicKey,
    pub timestamp: Timestamp,
    pub body: OverlayBody,
    pub signature: Signature,
}

impl SignedFrame {
    pub fn sign(body: OverlayBody, keys: &KeyPair, timestamp: Timestamp) -> Result<Self, NetworkError> {
        let message = signing_bytes(&keys.public, timestamp, &body)?;
        let signature = sign_message(&message, &keys.private);
        Ok(Self {
            sender: keys.public,
            timestamp,
            body,
            signature,
        })
    }

    pub fn verify(&self) -> bool {
        match signing_bytes(&self.sender, self.timestamp, &self.body) {
            Ok(message) => verify_signature(&message, &self.signature, &self.sender),
            Err(_) => false,
        }
    }

    pub fn sender_address(&self) -> ValidatorAddress {
        derive_address(&self.sender)
    }
}

fn signing_bytes(
    sender: &PublicKey,
    timestamp: Timestamp,
    body: &OverlayBody,
) -> Result<Vec<u8>, NetworkError> {
    bincode::serialize(&(sender, timestamp, body)).map_err(|e| NetworkError::Encode(e.to_string()))
}
