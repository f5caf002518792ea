//! Palisade validator node: wires the voting core to the validator overlay.
//!
//! The node:
//! - loads and validates its TOML configuration
//! - joins the validator overlay and keeps it meshed
//! - routes consensus traffic into the active voting session
//! - hands confirmed heights to block storage
//! - exports Prometheus metrics and structured logs

pub mod config;
pub mod consensus_service;
pub mod error;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod shutdown;
pub mod tracing_spans;

pub use config::{NodeConfig, ValidatorEntry};
pub use consensus_service::{ConsensusService, ServiceDeps};
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use message::ConsensusMessage;
pub use metrics::ConsensusMetrics;
pub use shutdown::ShutdownController;
