//! Round-based Byzantine block-confirmation voting.
//!
//! A fixed validator set agrees, height by height, on one candidate block or
//! an explicit empty block. Each round has two stages: stage one votes on the
//! proposal, stage two votes on stage one's certificate. A stage without
//! quorum before its deadline escalates to the next sub-round.
//!
//! ## Module overview
//!
//! - [`ballot`]: signed vote, wire layout, message/target keys.
//! - [`certificate`]: quorum-backed aggregation of ballots.
//! - [`scheme`]: signature scheme seam (Ed25519 in production).
//! - [`pool`]: generation-tagged ballot arena for the receive path.
//! - [`completion`]: single-assignment stage outcome.
//! - [`stage`] / [`round`]: tally and per-sub-round state.
//! - [`future_cache`]: ballots for rounds not reached yet.
//! - [`bifurcation`]: double-signing detection.
//! - [`session`]: per-height state machine.
//! - [`catch_up`]: "ballots I'm missing" requests.
//! - [`orchestrator`]: async driver with deadlines.
//! - [`services`]: block storage, evidence and validator-set collaborators.

pub mod ballot;
pub mod bifurcation;
pub mod catch_up;
pub mod certificate;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod future_cache;
pub mod orchestrator;
pub mod pool;
pub mod round;
pub mod scheme;
pub mod services;
pub mod session;
pub mod stage;
pub mod wire;

pub use ballot::{Ballot, BallotBody, MessageKey, Stage, TargetKey};
pub use bifurcation::{BifurcationDetector, BifurcationEvidence};
pub use catch_up::CatchUpRequest;
pub use certificate::Certificate;
pub use completion::{Completion, CompletionWaiter, StageOutcome};
pub use config::VotingConfig;
pub use context::ConsensusContext;
pub use error::ConsensusError;
pub use future_cache::FutureRoundCache;
pub use orchestrator::{
    deliver_confirmed, DriverExit, EventObserver, EventRouter, Outbound, SessionDriver,
};
pub use pool::{BallotHandle, BallotPool};
pub use round::{RoundKey, RoundState};
pub use scheme::{BallotSigner, Ed25519Scheme, KeyPairSigner, SignatureScheme};
pub use services::{quorum_size, BlockService, EvidenceSink, StaticValidatorSet, ValidatorSetProvider};
pub use session::{ReceiveOutcome, RoundInfo, SessionEvent, SessionOutcome, VotingSession};
pub use stage::{OfferOutcome, StageState};
pub use wire::CodecError;
