//! # Protocol Configuration & Constants
//!
//! Every magic number in the validator lives here. Per-register consensus
//! parameters come from the register's genesis configuration and travel
//! as [`ConsensusConfig`]; the constants below are node-wide policy that
//! does not vary per register.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Maximum clock skew tolerated on incoming transaction and docket
/// timestamps. Validator clocks are NTP-disciplined; half a minute of
/// tolerance covers the real-world tail without opening a useful replay
/// window.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// Transactions older than this are rejected at admission.
pub const MAX_TRANSACTION_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Confirmed dockets older than this are rejected by the confirmer.
pub const MAX_DOCKET_AGE: Duration = Duration::from_secs(60 * 60);

/// How long a known payload hash is remembered for gossip deduplication.
pub const DEDUP_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Leader heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Without a heartbeat for this long, followers consider the leader dead.
pub const LEADER_TIMEOUT: Duration = Duration::from_secs(15);

/// Consecutive missed liveness checks before an election is forced.
pub const MISSED_HEARTBEATS_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// Default per-register mempool capacity.
pub const MEMPOOL_MAX_SIZE: usize = 10_000;

/// Fraction of mempool capacity the High bucket may occupy before new
/// High admissions are downgraded to Normal.
pub const HIGH_PRIORITY_QUOTA: f64 = 0.25;

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

/// Reserved blueprint ID marking governance transactions.
pub const GOVERNANCE_BLUEPRINT_ID: &str = "blueprint:governance";

/// Metadata key/value marking a control transaction regardless of
/// blueprint.
pub const CONTROL_METADATA_KEY: &str = "transactionType";
pub const CONTROL_METADATA_VALUE: &str = "Control";

// ---------------------------------------------------------------------------
// ConsensusConfig
// ---------------------------------------------------------------------------

/// Per-register consensus parameters, sourced from the register's genesis
/// configuration and mutable only through committed `control.config_update`
/// transactions.
///
/// Durations are millisecond-denominated u64 fields so the struct
/// serializes to flat JSON without a duration encoding convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Lower bound on signatures a confirmed docket must carry.
    pub signature_threshold_min: u32,
    /// Upper bound on signatures collected before early termination.
    pub signature_threshold_max: u32,
    /// Overall deadline for one consensus round.
    pub docket_timeout_ms: u64,
    /// Per-validator vote request deadline.
    pub vote_timeout_ms: u64,
    /// Cap on signatures stored on a docket.
    pub max_signatures_per_docket: u32,
    /// Cap on transactions bundled per docket.
    pub max_transactions_per_docket: usize,
    /// Leader tick cadence: build when this much time has passed since
    /// the previous build.
    pub docket_build_interval_ms: u64,
    /// Build early once this many transactions are pending.
    pub docket_build_size_threshold: usize,
    /// Approval fraction that must be strictly exceeded for consensus.
    /// 0.5 is the strict-majority default; exactly the fraction is NOT
    /// enough.
    pub approval_threshold: f64,
    /// Consensus retries before a docket is abandoned.
    pub max_retries: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            signature_threshold_min: 1,
            signature_threshold_max: 64,
            docket_timeout_ms: 30_000,
            vote_timeout_ms: 5_000,
            max_signatures_per_docket: 64,
            max_transactions_per_docket: 100,
            docket_build_interval_ms: 2_000,
            docket_build_size_threshold: 50,
            approval_threshold: 0.5,
            max_retries: 3,
        }
    }
}

impl ConsensusConfig {
    pub fn docket_timeout(&self) -> Duration {
        Duration::from_millis(self.docket_timeout_ms)
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn docket_build_interval(&self) -> Duration {
        Duration::from_millis(self.docket_build_interval_ms)
    }

    /// The strict threshold predicate: true iff `approvals` strictly
    /// exceeds `total · approval_threshold`.
    pub fn threshold_met(&self, approvals: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        (approvals as f64) > (total as f64) * self.approval_threshold
    }
}
