//! Nullable network: record messages without sending them.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use palisade_network::NetworkService;
use palisade_types::NodeId;

/// One message the node handed to the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    To { node: NodeId, bytes: Vec<u8> },
    Flood { exclude: Option<NodeId>, bytes: Vec<u8> },
}

/// A test network that records messages instead of sending them.
///
/// Dials succeed unless the endpoint was marked with [`NullNetwork::refuse`].
#[derive(Default)]
pub struct NullNetwork {
    outbox: Mutex<Vec<Outgoing>>,
    connected: Mutex<HashSet<NodeId>>,
    refused: Mutex<HashSet<NodeId>>,
    dials: Mutex<Vec<NodeId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NullNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future dial to `node` fail.
    pub fn refuse(&self, node: &NodeId) {
        lock(&self.refused).insert(node.clone());
    }

    pub fn accept(&self, node: &NodeId) {
        lock(&self.refused).remove(node);
    }

    /// Remove and return everything sent so far.
    pub fn take_outgoing(&self) -> Vec<Outgoing> {
        std::mem::take(&mut *lock(&self.outbox))
    }

    /// Bytes sent directly to `node` so far, without draining.
    pub fn sent_to(&self, node: &NodeId) -> Vec<Vec<u8>> {
        lock(&self.outbox)
            .iter()
            .filter_map(|o| match o {
                Outgoing::To { node: to, bytes } if to == node => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn outgoing_count(&self) -> usize {
        lock(&self.outbox).len()
    }

    pub fn is_connected(&self, node: &NodeId) -> bool {
        lock(&self.connected).contains(node)
    }

    /// Every endpoint dialled so far, in order.
    pub fn dials(&self) -> Vec<NodeId> {
        lock(&self.dials).clone()
    }

    /// Clear all state.
    pub fn reset(&self) {
        lock(&self.outbox).clear();
        lock(&self.connected).clear();
        lock(&self.refused).clear();
        lock(&self.dials).clear();
    }
}

impl NetworkService for NullNetwork {
    fn connect(&self, node: &NodeId) -> bool {
        lock(&self.dials).push(node.clone());
        if lock(&self.refused).contains(node) {
            return false;
        }
        lock(&self.connected).insert(node.clone());
        true
    }

    fn disconnect(&self, node: &NodeId) {
        lock(&self.connected).remove(node);
    }

    fn send(&self, node: &NodeId, bytes: &[u8]) -> bool {
        lock(&self.outbox).push(Outgoing::To {
            node: node.clone(),
            bytes: bytes.to_vec(),
        });
        true
    }

    fn broadcast(&self, exclude: Option<&NodeId>, bytes: &[u8]) -> bool {
        lock(&self.outbox).push(Outgoing::Flood {
            exclude: exclude.cloned(),
            bytes: bytes.to_vec(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sends_and_broadcasts() {
        let net = NullNetwork::new();
        let peer = NodeId::new("10.0.0.1:7075");
        net.send(&peer, b"one");
        net.broadcast(Some(&peer), b"two");

        assert_eq!(net.sent_to(&peer), vec![b"one".to_vec()]);
        assert_eq!(net.outgoing_count(), 2);
        let out = net.take_outgoing();
        assert_eq!(
            out[1],
            Outgoing::Flood {
                exclude: Some(peer),
                bytes: b"two".to_vec()
            }
        );
        assert_eq!(net.outgoing_count(), 0);
    }

    #[test]
    fn refused_endpoints_fail_to_connect() {
        let net = NullNetwork::new();
        let peer = NodeId::new("10.0.0.2:7075");
        net.refuse(&peer);
        assert!(!net.connect(&peer));
        assert!(!net.is_connected(&peer));

        net.accept(&peer);
        assert!(net.connect(&peer));
        assert!(net.is_connected(&peer));
        assert_eq!(net.dials(), vec![peer.clone(), peer]);
    }
}
