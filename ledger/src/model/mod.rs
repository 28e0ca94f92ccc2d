//! # Data Model
//!
//! The vocabulary of the ledger: transactions, dockets, votes, validators,
//! the admin roster, and blueprints. These types cross every boundary in
//! the system — wire envelopes, the mempool, consensus, and persistence —
//! so they are plain serde structs with no behavior beyond their own
//! commitments and invariant helpers.

pub mod blueprint;
pub mod docket;
pub mod roster;
pub mod transaction;
pub mod validator;

pub use blueprint::{Blueprint, BlueprintAction};
pub use docket::{ConsensusVote, Docket, DocketStatus, VoteDecision};
pub use roster::{AdminRole, AdminRoster, GovernanceOperation, RosterAttestation};
pub use transaction::{Priority, Signature, SignatureAlgorithm, Transaction};
pub use validator::{ValidatorInfo, ValidatorRegistration, ValidatorStatus};
