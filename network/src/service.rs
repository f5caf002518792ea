//! The transport seam the validator overlay sits on.
//!
//! [`NetworkService`] is what the overlay needs from the general P2P layer:
//! dial, hang up, send to one peer, flood to everyone. The node's
//! connection layer implements it; tests use the in-memory transport from
//! `palisade-nullables`.

use palisade_types::NodeId;

/// Transport operations used by the overlay and the consensus service.
pub trait NetworkService: Send + Sync {
    /// Dial `node`. Returns `false` if the connection could not be started.
    fn connect(&self, node: &NodeId) -> bool;

    fn disconnect(&self, node: &NodeId);

    /// Queue `bytes` for a single connected peer.
    fn send(&self, node: &NodeId, bytes: &[u8]) -> bool;

    /// Flood `bytes` to every connected peer except `exclude`.
    fn broadcast(&self, exclude: Option<&NodeId>, bytes: &[u8]) -> bool;
}
