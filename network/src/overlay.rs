//! The validator overlay: a mesh of direct connections between validators,
//! kept separate from general gossip.
//!
//! A validator announces itself with an `Identity` frame per peer, sealed to
//! that peer's key and flooded over the general network. The recipient dials
//! the announced endpoint, answers with its own Identity (flagged as a reply),
//! and tells both sides about the rest of the mesh with `Share` frames.
//! `Disconnect` announces a voluntary departure.
//!
//! Control frames that fail signature, timestamp or membership checks are
//! dropped and reported as errors to the caller, never relayed.

use std::sync::Arc;

use palisade_crypto::{
    derive_address, ed25519_private_to_x25519, ed25519_public_to_x25519, open_from, seal_for,
    CryptoError,
};
use palisade_types::{KeyPair, NodeId, PublicKey, Timestamp, ValidatorAddress};
use serde::{Deserialize, Serialize};

use crate::dedup::{DedupConfig, DuplicateSuppressor};
use crate::membership::{ShareEntry, ValidatorMembership};
use crate::message::{IdentityPayload, OverlayBody, SignedFrame, WireFrame};
use crate::service::NetworkService;
use crate::NetworkError;

// -- Configuration -------------------------------------------------------------

/// Tuning for the overlay (`[overlay]` in the node config).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Control frames whose timestamp is further than this from local time
    /// are treated as replays.
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// Validators that have failed this many consecutive dials are no
    /// longer redialled by `maintain`; a fresh Identity or Share resets them.
    #[serde(default = "default_redial_fail_limit")]
    pub redial_fail_limit: u32,
}

fn default_max_clock_skew_secs() -> u64 {
    30
}

fn default_redial_fail_limit() -> u32 {
    5
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_secs: default_max_clock_skew_secs(),
            redial_fail_limit: default_redial_fail_limit(),
        }
    }
}

// -- Events ----------------------------------------------------------------------

/// What an inbound frame amounted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverlayEvent {
    /// A consensus payload from a connected validator.
    Consensus { from: ValidatorAddress, payload: Vec<u8> },
    /// Validators that became connected while handling the frame.
    Joined(Vec<ValidatorAddress>),
    /// A validator announced its departure.
    Left(ValidatorAddress),
    /// Seen before.
    Duplicate,
    /// Valid, but nothing for us to do.
    Ignored,
}

/// Result of one [`ValidatorOverlay::maintain`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintainReport {
    pub redialed: usize,
    pub failed: usize,
    pub announced: usize,
}

// -- Overlay ---------------------------------------------------------------------

pub struct ValidatorOverlay {
    keys: KeyPair,
    address: ValidatorAddress,
    node_id: NodeId,
    membership: ValidatorMembership,
    dedup: DuplicateSuppressor,
    network: Arc<dyn NetworkService>,
    config: OverlayConfig,
}

impl ValidatorOverlay {
    pub fn new(
        keys: KeyPair,
        node_id: NodeId,
        validators: impl IntoIterator<Item = (ValidatorAddress, PublicKey)>,
        network: Arc<dyn NetworkService>,
        config: OverlayConfig,
        dedup: &DedupConfig,
    ) -> Self {
        let address = derive_address(&keys.public);
        Self {
            keys,
            address,
            node_id,
            membership: ValidatorMembership::new(validators),
            dedup: DuplicateSuppressor::from_config(dedup),
            network,
            config,
        }
    }

    pub fn address(&self) -> &ValidatorAddress {
        &self.address
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn membership(&self) -> &ValidatorMembership {
        &self.membership
    }

    pub fn connected_count(&self) -> usize {
        self.membership.connected_count()
    }

    pub fn is_connected(&self, address: &ValidatorAddress) -> bool {
        self.membership.is_connected(address)
    }

    // -- Outbound control ----------------------------------------------------------

    /// Flood an Identity for every validator we cannot currently reach.
    pub fn announce(&mut self, now: Timestamp) -> usize {
        let mut announced = 0;
        for recipient in self.membership.unreachable(&self.address) {
            match self.identity_frame(&recipient, false, now) {
                Ok(bytes) => {
                    self.dedup.check_message(&bytes);
                    if self.network.broadcast(None, &bytes) {
                        announced += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(recipient = %recipient, error = %err, "failed to build identity");
                }
            }
        }
        tracing::debug!(announced, "announced identity to unreachable validators");
        announced
    }

    /// Redial disconnected validators and re-announce if any stay unreachable.
    pub fn maintain(&mut self, now: Timestamp) -> MaintainReport {
        let mut report = MaintainReport::default();
        for (address, node) in self.membership.dial_candidates(self.config.redial_fail_limit) {
            if self.connect_validator(&address, &node, now) {
                report.redialed += 1;
                self.introduce(&address, &node, false, now);
            } else {
                report.failed += 1;
            }
        }
        if !self.membership.unreachable(&self.address).is_empty() {
            report.announced = self.announce(now);
        }
        report
    }

    /// Tell connected validators we are leaving, then drop every link.
    pub fn leave(&mut self, now: Timestamp) {
        let peers = self.membership.connected_nodes(None);
        match self.signed(OverlayBody::Disconnect, now) {
            Ok(bytes) => {
                for (_, node) in &peers {
                    self.network.send(node, &bytes);
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to build disconnect"),
        }
        for (address, node) in peers {
            self.network.disconnect(&node);
            self.membership.mark_disconnected(&address);
        }
    }

    /// The connection layer lost the link to `node`.
    pub fn connection_lost(&mut self, node: &NodeId) -> Option<ValidatorAddress> {
        let address = self.membership.address_for(node)?.clone();
        self.membership.mark_disconnected(&address);
        tracing::debug!(validator = %address, node = %node, "validator link lost");
        Some(address)
    }

    // -- Consensus payloads ----------------------------------------------------------

    /// Send a consensus payload to one connected validator.
    pub fn send_to_validator(&self, address: &ValidatorAddress, payload: &[u8]) -> bool {
        if !self.membership.is_connected(address) {
            return false;
        }
        let Some(node) = self.membership.node_for(address) else {
            return false;
        };
        match WireFrame::Consensus(payload.to_vec()).encode() {
            Ok(bytes) => self.network.send(node, &bytes),
            Err(_) => false,
        }
    }

    /// Send a consensus payload to every connected validator except
    /// `exclude`. Returns how many sends were queued.
    pub fn send_to_validators(&self, payload: &[u8], exclude: Option<&ValidatorAddress>) -> usize {
        let Ok(bytes) = WireFrame::Consensus(payload.to_vec()).encode() else {
            return 0;
        };
        self.membership
            .connected_nodes(exclude)
            .iter()
            .filter(|(_, node)| self.network.send(node, &bytes))
            .count()
    }

    // -- Inbound ---------------------------------------------------------------------

    /// Handle one frame received from `from`.
    pub fn handle_frame(
        &mut self,
        from: &NodeId,
        bytes: &[u8],
        now: Timestamp,
    ) -> Result<OverlayEvent, NetworkError> {
        match WireFrame::decode(bytes)? {
            WireFrame::Consensus(payload) => Ok(self.on_consensus(from, payload)),
            WireFrame::Overlay(frame) => {
                if self.dedup.check_message(bytes) {
                    return Ok(OverlayEvent::Duplicate);
                }
                let sender = self.authenticate(&frame, now)?;
                if sender == self.address {
                    return Ok(OverlayEvent::Ignored);
                }
                tracing::debug!(kind = frame.body.kind(), sender = %sender, "overlay frame");
                match frame.body {
                    OverlayBody::Identity { recipient, sealed, reply } => {
                        self.on_identity(&sender, &frame.sender, &recipient, &sealed, reply, now)
                    }
                    OverlayBody::Share { peers } => Ok(self.on_share(&sender, peers, now)),
                    OverlayBody::Disconnect => Ok(self.on_disconnect(sender)),
                }
            }
        }
    }

    fn on_consensus(&self, from: &NodeId, payload: Vec<u8>) -> OverlayEvent {
        match self.membership.address_for(from) {
            Some(address) if self.membership.is_connected(address) => OverlayEvent::Consensus {
                from: address.clone(),
                payload,
            },
            _ => {
                tracing::debug!(node = %from, "consensus payload from outside the validator mesh");
                OverlayEvent::Ignored
            }
        }
    }

    fn authenticate(&self, frame: &SignedFrame, now: Timestamp) -> Result<ValidatorAddress, NetworkError> {
        let skew_secs = now.distance(frame.timestamp);
        if skew_secs > self.config.max_clock_skew_secs {
            tracing::warn!(skew_secs, kind = frame.body.kind(), "dropping skewed overlay frame");
            return Err(NetworkError::ClockSkew { skew_secs });
        }
        if !frame.verify() {
            tracing::warn!(kind = frame.body.kind(), "dropping overlay frame with bad signature");
            return Err(NetworkError::OverlayAuthFailure("bad signature".into()));
        }
        let sender = frame.sender_address();
        if sender == self.address {
            return Ok(sender);
        }
        match self.membership.public_key(&sender) {
            Some(key) if key == frame.sender => Ok(sender),
            _ => Err(NetworkError::NotValidator(sender)),
        }
    }

    fn on_identity(
        &mut self,
        sender: &ValidatorAddress,
        sender_key: &PublicKey,
        recipient: &ValidatorAddress,
        sealed: &[u8],
        reply: bool,
        now: Timestamp,
    ) -> Result<OverlayEvent, NetworkError> {
        if recipient != &self.address {
            return Ok(OverlayEvent::Ignored);
        }

        let sender_x25519 =
            ed25519_public_to_x25519(&sender_key.0).ok_or(CryptoError::InvalidPublicKey)?;
        let secret = ed25519_private_to_x25519(&self.keys.private.0);
        let opened = open_from(sealed, &sender_x25519, &secret)
            .map_err(|e| NetworkError::OverlayAuthFailure(format!("identity from {sender}: {e}")))?;
        let payload: IdentityPayload = bincode::deserialize(&opened)?;
        if &payload.address != sender {
            return Err(NetworkError::OverlayAuthFailure(format!(
                "identity signed by {sender} names {}",
                payload.address
            )));
        }

        self.membership.record_endpoint(sender, payload.node_id.clone(), now);
        let joined = if self.membership.is_connected(sender) {
            false
        } else if self.connect_validator(sender, &payload.node_id, now) {
            true
        } else {
            return Ok(OverlayEvent::Ignored);
        };

        if !reply {
            self.introduce(sender, &payload.node_id, true, now);
        }
        if joined {
            self.share_new_peer(sender, &payload.node_id, now);
            return Ok(OverlayEvent::Joined(vec![sender.clone()]));
        }
        Ok(OverlayEvent::Ignored)
    }

    fn on_share(&mut self, sender: &ValidatorAddress, peers: Vec<ShareEntry>, now: Timestamp) -> OverlayEvent {
        let mut joined = Vec::new();
        for entry in peers {
            if entry.address == self.address {
                continue;
            }
            let advertised = derive_address(&entry.public_key);
            if advertised != entry.address
                || self.membership.public_key(&entry.address) != Some(entry.public_key)
            {
                tracing::warn!(from = %sender, entry = %entry.address, "ignoring share entry for unknown validator");
                continue;
            }
            if self.membership.is_connected(&entry.address) {
                continue;
            }
            if !self.membership.record_shared_endpoint(&entry.address, &entry.node_id) {
                tracing::debug!(
                    from = %sender,
                    entry = %entry.address,
                    node = %entry.node_id,
                    "share entry conflicts with the validator's own endpoint"
                );
                continue;
            }
            if self.connect_validator(&entry.address, &entry.node_id, now) {
                self.introduce(&entry.address, &entry.node_id, false, now);
                joined.push(entry.address);
            }
        }
        if joined.is_empty() {
            OverlayEvent::Ignored
        } else {
            OverlayEvent::Joined(joined)
        }
    }

    fn on_disconnect(&mut self, sender: ValidatorAddress) -> OverlayEvent {
        if let Some(node) = self.membership.node_for(&sender).cloned() {
            self.network.disconnect(&node);
        }
        self.membership.mark_disconnected(&sender);
        tracing::debug!(validator = %sender, "validator left the overlay");
        OverlayEvent::Left(sender)
    }

    // -- Helpers ---------------------------------------------------------------------

    fn connect_validator(&mut self, address: &ValidatorAddress, node: &NodeId, now: Timestamp) -> bool {
        if self.network.connect(node) {
            self.membership.mark_connected(address, now);
            tracing::debug!(validator = %address, node = %node, "validator connected");
            true
        } else {
            let fails = self.membership.record_failure(address);
            tracing::debug!(validator = %address, node = %node, fails, "validator dial failed");
            false
        }
    }

    /// Send our Identity straight to `node`.
    fn introduce(&mut self, address: &ValidatorAddress, node: &NodeId, reply: bool, now: Timestamp) {
        match self.identity_frame(address, reply, now) {
            Ok(bytes) => {
                self.network.send(node, &bytes);
            }
            Err(err) => tracing::warn!(recipient = %address, error = %err, "failed to build identity"),
        }
    }

    /// Tell a newly connected validator about the mesh, and the mesh about it.
    fn share_new_peer(&mut self, address: &ValidatorAddress, node: &NodeId, now: Timestamp) {
        let known = self.membership.share_entries(Some(address));
        if !known.is_empty() {
            if let Ok(bytes) = self.signed(OverlayBody::Share { peers: known }, now) {
                self.network.send(node, &bytes);
            }
        }

        let Some(public_key) = self.membership.public_key(address) else {
            return;
        };
        let entry = ShareEntry {
            address: address.clone(),
            public_key,
            node_id: node.clone(),
        };
        let others = self.membership.connected_nodes(Some(address));
        if others.is_empty() {
            return;
        }
        if let Ok(bytes) = self.signed(OverlayBody::Share { peers: vec![entry] }, now) {
            for (_, other) in others {
                self.network.send(&other, &bytes);
            }
        }
    }

    fn identity_frame(
        &self,
        recipient: &ValidatorAddress,
        reply: bool,
        now: Timestamp,
    ) -> Result<Vec<u8>, NetworkError> {
        let recipient_key = self
            .membership
            .public_key(recipient)
            .ok_or_else(|| NetworkError::NotValidator(recipient.clone()))?;
        let recipient_x25519 =
            ed25519_public_to_x25519(&recipient_key.0).ok_or(CryptoError::InvalidPublicKey)?;
        let payload = IdentityPayload {
            address: self.address.clone(),
            node_id: self.node_id.clone(),
        };
        let plaintext = bincode::serialize(&payload).map_err(|e| NetworkError::Encode(e.to_string()))?;
        let secret = ed25519_private_to_x25519(&self.keys.private.0);
        let sealed = seal_for(&plaintext, &recipient_x25519, &secret)?;
        self.signed(
            OverlayBody::Identity {
                recipient: recipient.clone(),
                sealed,
                reply,
            },
            now,
        )
    }

    fn signed(&self, body: OverlayBody, now: Timestamp) -> Result<Vec<u8>, NetworkError> {
        WireFrame::Overlay(SignedFrame::sign(body, &self.keys, now)?).encode()
    }
}
