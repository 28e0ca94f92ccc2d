//! # Consensus
//!
//! The docket lifecycle from leadership to confirmation:
//!
//! - [`leader`] — rotating per-register leader election with heartbeat
//!   failover.
//! - [`builder`] — docket assembly and genesis bootstrap.
//! - [`collector`] — parallel vote fan-out with deadlines and early
//!   termination.
//! - [`engine`] — the leader round and the follower vote.
//! - [`pending`] — the in-flight docket store.
//! - [`failure`] — retry and abandon handling for failed rounds.
//! - [`confirmer`] — follower-side verification of gossiped confirmed
//!   dockets.
//! - [`control`] — committed control-transaction application.

pub mod builder;
pub mod collector;
pub mod confirmer;
pub mod control;
pub mod engine;
pub mod failure;
pub mod leader;
pub mod pending;

pub use builder::{docket_signing_bytes, DocketBuilder, GenesisManager};
pub use collector::{SignatureCollectionResult, SignatureCollector};
pub use confirmer::{DocketConfirmer, DocketConfirmerConfig, DocketRejection};
pub use control::{ControlActionType, ControlDocketProcessor, ControlOutcome, ControlTx};
pub use engine::{ConsensusEngine, ConsensusResult};
pub use failure::{ConsensusFailureHandler, FailureAction, FailureOutcome};
pub use leader::{LeaderElection, LeaderElectionConfig};
pub use pending::{PendingDocketStore, PendingEntry, PendingStoreStats};
