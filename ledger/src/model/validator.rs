//! Validator identity and lifecycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a validator within a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidatorStatus {
    /// Registered under consent mode, awaiting approval.
    Pending,
    /// Participating in consensus.
    Active,
    /// Temporarily excluded (operator action or repeated misbehavior).
    Suspended,
    /// Permanently removed, or a rejected pending registration.
    Removed,
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Active => write!(f, "Active"),
            Self::Suspended => write!(f, "Suspended"),
            Self::Removed => write!(f, "Removed"),
        }
    }
}

/// A validator as known to a register's registry.
///
/// `order_index` is the validator's stable rotation slot: assigned
/// sequentially at registration, unique within the register, never
/// reused. Leader election is a pure function of term number over the
/// ordered active slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Unique validator identifier.
    pub validator_id: String,
    /// Verification key for this validator's votes and proposals.
    #[serde(with = "crate::crypto::b64")]
    pub public_key: Vec<u8>,
    /// Endpoint peers use for `request_vote` / `send_heartbeat`.
    pub rpc_endpoint: String,
    /// Lifecycle state.
    pub status: ValidatorStatus,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Stable rotation slot within the register.
    pub order_index: u64,
    /// Local reputation estimate, decremented for non-response. Nodes may
    /// disagree on this value; it never enters consensus.
    pub reputation_score: f64,
    /// Free-form metadata (approval/rejection audit trail lives here).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ValidatorInfo {
    /// Whether this validator participates in consensus rounds.
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }
}

/// A registration request, before the registry has assigned a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRegistration {
    pub validator_id: String,
    #[serde(with = "crate::crypto::b64")]
    pub public_key: Vec<u8>,
    pub rpc_endpoint: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
