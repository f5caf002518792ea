//! Pre-built [`tracing::Span`] constructors for the node's consensus work.
//!
//! Consistent span names and fields make a height's ballots, certificates
//! and overlay traffic easy to correlate in any tracing backend.

use tracing::{info_span, Span};

/// Span covering the whole voting session for one height.
pub fn session_span(height: u64, round_index: u32, packing_index: u16) -> Span {
    info_span!("session", height, round_index, packing_index)
}

/// Span covering the handling of one inbound overlay frame.
pub fn overlay_recv_span(node: &str) -> Span {
    info_span!("overlay_recv", node = %node)
}

/// Span covering one consensus message from a validator.
pub fn consensus_recv_span(validator: &str, kind: &str) -> Span {
    info_span!("consensus_recv", validator = %validator, kind = %kind)
}
