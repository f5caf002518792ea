//! Validator-to-validator networking for Palisade.
//!
//! The general P2P layer is abstracted behind [`NetworkService`]; on top of it
//! this crate maintains the validator overlay (a connected mesh restricted to
//! the validator set) and the bounded duplicate suppression used for overlay
//! and consensus traffic.

pub mod dedup;
pub mod error;
pub mod membership;
pub mod message;
pub mod overlay;
pub mod service;

pub use dedup::{DedupConfig, DuplicateSuppressor};
pub use error::NetworkError;
pub use membership::{ShareEntry, ValidatorMembership, ValidatorRecord};
pub use message::{IdentityPayload, OverlayBody, SignedFrame, WireFrame, MAX_FRAME_LEN};
pub use overlay::{MaintainReport, OverlayConfig, OverlayEvent, ValidatorOverlay};
pub use service::NetworkService;
