//! The overlay's view of the validator set.
//!
//! Membership itself is external: the table is seeded with the configured
//! `(address, public key)` pairs and only learns how to reach each validator
//! and whether it is currently connected. Validators that keep failing to
//! connect are deprioritised, never removed.
//!
//! An endpoint a validator announced in its own Identity outranks any
//! endpoint relayed for it by someone else's Share.

use std::collections::BTreeMap;

use palisade_types::{NodeId, PublicKey, Timestamp, ValidatorAddress};
use serde::{Deserialize, Serialize};

/// A validator as advertised in a `Share` message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntry {
    pub address: ValidatorAddress,
    pub public_key: PublicKey,
    pub node_id: NodeId,
}

/// Everything the overlay tracks about one validator.
#[derive(Clone, Debug)]
pub struct ValidatorRecord {
    pub address: ValidatorAddress,
    pub public_key: PublicKey,
    /// Where the validator was last announced to be reachable.
    pub node_id: Option<NodeId>,
    /// `node_id` came from the validator's own Identity.
    pub self_announced: bool,
    pub connected: bool,
    /// Consecutive failed dials; reset on a successful connection.
    pub fail_count: u32,
    pub last_seen: Option<Timestamp>,
}

pub struct ValidatorMembership {
    records: BTreeMap<ValidatorAddress, ValidatorRecord>,
}

impl ValidatorMembership {
    pub fn new(validators: impl IntoIterator<Item = (ValidatorAddress, PublicKey)>) -> Self {
        let records = validators
            .into_iter()
            .map(|(address, public_key)| {
                let record = ValidatorRecord {
                    address: address.clone(),
                    public_key,
                    node_id: None,
                    self_announced: false,
                    connected: false,
                    fail_count: 0,
                    last_seen: None,
                };
                (address, record)
            })
            .collect();
        Self { records }
    }

    pub fn is_validator(&self, address: &ValidatorAddress) -> bool {
        self.records.contains_key(address)
    }

    pub fn get(&self, address: &ValidatorAddress) -> Option<&ValidatorRecord> {
        self.records.get(address)
    }

    pub fn public_key(&self, address: &ValidatorAddress) -> Option<PublicKey> {
        self.records.get(address).map(|r| r.public_key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ValidatorAddress> {
        self.records.keys()
    }

    /// Record where `address` says it can be reached. Returns `true` if the
    /// endpoint changed, in which case any existing connection is stale.
    pub fn record_endpoint(&mut self, address: &ValidatorAddress, node_id: NodeId, now: Timestamp) -> bool {
        let Some(record) = self.records.get_mut(address) else {
            return false;
        };
        record.last_seen = Some(now);
        record.self_announced = true;
        if record.node_id.as_ref() == Some(&node_id) {
            return false;
        }
        record.node_id = Some(node_id);
        record.connected = false;
        true
    }

    /// Record an endpoint relayed for `address` by another validator. It
    /// fills in an unknown endpoint or replaces a relayed one, and never
    /// touches a connected or self-announced validator. Returns whether
    /// `node_id` is now the recorded endpoint.
    pub fn record_shared_endpoint(&mut self, address: &ValidatorAddress, node_id: &NodeId) -> bool {
        let Some(record) = self.records.get_mut(address) else {
            return false;
        };
        if record.node_id.as_ref() == Some(node_id) {
            return true;
        }
        if record.connected || record.self_announced {
            return false;
        }
        record.node_id = Some(node_id.clone());
        true
    }

    pub fn mark_connected(&mut self, address: &ValidatorAddress, now: Timestamp) {
        if let Some(record) = self.records.get_mut(address) {
            record.connected = true;
            record.fail_count = 0;
            record.last_seen = Some(now);
        }
    }

    pub fn mark_disconnected(&mut self, address: &ValidatorAddress) {
        if let Some(record) = self.records.get_mut(address) {
            record.connected = false;
        }
    }

    pub fn record_failure(&mut self, address: &ValidatorAddress) -> u32 {
        match self.records.get_mut(address) {
            Some(record) => {
                record.connected = false;
                record.fail_count = record.fail_count.saturating_add(1);
                record.fail_count
            }
            None => 0,
        }
    }

    pub fn is_connected(&self, address: &ValidatorAddress) -> bool {
        self.records.get(address).is_some_and(|r| r.connected)
    }

    pub fn node_for(&self, address: &ValidatorAddress) -> Option<&NodeId> {
        self.records.get(address).and_then(|r| r.node_id.as_ref())
    }

    /// Reverse lookup from an endpoint to the validator announced on it.
    pub fn address_for(&self, node: &NodeId) -> Option<&ValidatorAddress> {
        self.records
            .values()
            .find(|r| r.node_id.as_ref() == Some(node))
            .map(|r| &r.address)
    }

    pub fn connected_count(&self) -> usize {
        self.records.values().filter(|r| r.connected).count()
    }

    /// Endpoints of every connected validator other than `exclude`.
    pub fn connected_nodes(&self, exclude: Option<&ValidatorAddress>) -> Vec<(ValidatorAddress, NodeId)> {
        self.records
            .values()
            .filter(|r| r.connected && Some(&r.address) != exclude)
            .filter_map(|r| r.node_id.clone().map(|n| (r.address.clone(), n)))
            .collect()
    }

    /// Share entries for every connected validator other than `exclude`.
    pub fn share_entries(&self, exclude: Option<&ValidatorAddress>) -> Vec<ShareEntry> {
        self.records
            .values()
            .filter(|r| r.connected && Some(&r.address) != exclude)
            .filter_map(|r| {
                r.node_id.clone().map(|node_id| ShareEntry {
                    address: r.address.clone(),
                    public_key: r.public_key,
                    node_id,
                })
            })
            .collect()
    }

    /// Disconnected validators with a known endpoint, fewest failures first,
    /// excluding any that have reached `fail_limit`.
    pub fn dial_candidates(&self, fail_limit: u32) -> Vec<(ValidatorAddress, NodeId)> {
        let mut candidates: Vec<&ValidatorRecord> = self
            .records
            .values()
            .filter(|r| !r.connected && r.node_id.is_some() && r.fail_count < fail_limit)
            .collect();
        candidates.sort_by_key(|r| r.fail_count);
        candidates
            .into_iter()
            .filter_map(|r| r.node_id.clone().map(|n| (r.address.clone(), n)))
            .collect()
    }

    /// Validators we cannot currently talk to, `local` excluded.
    pub fn unreachable(&self, local: &ValidatorAddress) -> Vec<ValidatorAddress> {
        self.records
            .values()
            .filter(|r| &r.address != local && !r.connected)
            .map(|r| r.address.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> ValidatorAddress {
        ValidatorAddress::new(format!("pal_validator{n}"))
    }

    fn node(n: u8) -> NodeId {
        NodeId::new(format!("10.0.0.{n}:7075"))
    }

    fn table(count: u8) -> ValidatorMembership {
        ValidatorMembership::new((1..=count).map(|n| (addr(n), PublicKey([n; 32]))))
    }

    #[test]
    fn seeded_validators_start_unreachable() {
        let members = table(3);
        assert_eq!(members.len(), 3);
        assert!(members.is_validator(&addr(2)));
        assert!(!members.is_validator(&addr(9)));
        assert_eq!(members.connected_count(), 0);
        assert_eq!(members.unreachable(&addr(1)), vec![addr(2), addr(3)]);
    }

    #[test]
    fn endpoints_only_recorded_for_members() {
        let mut members = table(2);
        let now = Timestamp::new(100);
        assert!(!members.record_endpoint(&addr(9), node(9), now));
        assert!(members.record_endpoint(&addr(1), node(1), now));
        assert!(!members.record_endpoint(&addr(1), node(1), now));
        assert_eq!(members.address_for(&node(1)), Some(&addr(1)));
    }

    #[test]
    fn new_endpoint_drops_connection_flag() {
        let mut members = table(1);
        let now = Timestamp::new(100);
        members.record_endpoint(&addr(1), node(1), now);
        members.mark_connected(&addr(1), now);
        assert!(members.is_connected(&addr(1)));

        assert!(members.record_endpoint(&addr(1), node(7), now));
        assert!(!members.is_connected(&addr(1)));
    }

    #[test]
    fn relayed_endpoint_only_fills_gaps() {
        let mut members = table(3);
        let now = Timestamp::new(100);

        assert!(members.record_shared_endpoint(&addr(1), &node(1)));
        assert!(members.record_shared_endpoint(&addr(1), &node(4)));
        assert_eq!(members.node_for(&addr(1)), Some(&node(4)));
        assert!(!members.record_shared_endpoint(&addr(9), &node(9)));

        members.record_endpoint(&addr(2), node(2), now);
        assert!(!members.record_shared_endpoint(&addr(2), &node(6)));
        assert!(members.record_shared_endpoint(&addr(2), &node(2)));
        assert_eq!(members.node_for(&addr(2)), Some(&node(2)));

        members.record_shared_endpoint(&addr(3), &node(3));
        members.mark_connected(&addr(3), now);
        assert!(!members.record_shared_endpoint(&addr(3), &node(6)));
        assert!(members.is_connected(&addr(3)));
        assert_eq!(members.node_for(&addr(3)), Some(&node(3)));
    }

    #[test]
    fn dial_candidates_prefer_fewer_failures() {
        let mut members = table(3);
        let now = Timestamp::new(100);
        for n in 1..=3 {
            members.record_endpoint(&addr(n), node(n), now);
        }
        members.record_failure(&addr(1));
        members.record_failure(&addr(1));
        members.record_failure(&addr(2));

        let order: Vec<_> = members.dial_candidates(10).into_iter().map(|(a, _)| a).collect();
        assert_eq!(order, vec![addr(3), addr(2), addr(1)]);

        let limited: Vec<_> = members.dial_candidates(2).into_iter().map(|(a, _)| a).collect();
        assert_eq!(limited, vec![addr(3), addr(2)]);
    }

    #[test]
    fn connecting_resets_fail_count() {
        let mut members = table(1);
        members.record_endpoint(&addr(1), node(1), Timestamp::new(1));
        assert_eq!(members.record_failure(&addr(1)), 1);
        members.mark_connected(&addr(1), Timestamp::new(2));
        assert_eq!(members.get(&addr(1)).map(|r| r.fail_count), Some(0));
        assert!(members.dial_candidates(5).is_empty());
    }

    #[test]
    fn share_entries_exclude_target_and_disconnected() {
        let mut members = table(3);
        let now = Timestamp::new(5);
        for n in 1..=3 {
            members.record_endpoint(&addr(n), node(n), now);
        }
        members.mark_connected(&addr(1), now);
        members.mark_connected(&addr(2), now);

        let entries = members.share_entries(Some(&addr(2)));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, addr(1));
        assert_eq!(entries[0].node_id, node(1));
        assert_eq!(entries[0].public_key, PublicKey([1; 32]));
    }
}
