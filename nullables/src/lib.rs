//! Nullable infrastructure for deterministic testing.
//!
//! Every external collaborator of the voting core (clock, network, block
//! storage, evidence collection, validator set) has a test-friendly
//! implementation here that:
//! - returns deterministic values
//! - records what it was asked to do
//! - can be steered programmatically
//! - never touches the filesystem or the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod blocks;
pub mod clock;
pub mod evidence;
pub mod network;
pub mod validators;

pub use blocks::{NullBlockService, SavedBlock};
pub use clock::NullClock;
pub use evidence::{NullEvidenceSink, Report};
pub use network::{NullNetwork, Outgoing};
pub use validators::NullValidators;
