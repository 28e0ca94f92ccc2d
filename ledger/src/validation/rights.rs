//! Governance rights enforcement.
//!
//! A governance transaction mutates the register's control plane —
//! roster, validators, policy — so it is authorized against the admin
//! roster before it ever reaches a docket. Ordinary transactions pass
//! through untouched.
//!
//! Authorization ladder:
//!
//! 1. No roster yet + a well-formed genesis control transaction → accept
//!    (this is how a register bootstraps its roster).
//! 2. Signer must be on the roster, and must not be an Auditor.
//! 3. A carried governance operation must be structurally valid.
//! 4. Non-Owners need quorum; Owners act unilaterally.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::ValidationError;
use crate::config::{CONTROL_METADATA_KEY, CONTROL_METADATA_VALUE, GOVERNANCE_BLUEPRINT_ID};
use crate::model::{AdminRole, AdminRoster, GovernanceOperation, Transaction};
use crate::services::ServiceError;

/// The control-plane action that establishes a register's roster.
pub const GENESIS_CONTROL_ACTION: &str = "control.genesis";

/// Read access to the persisted admin roster.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn load_roster(&self, register_id: &str) -> Result<Option<AdminRoster>, ServiceError>;
}

/// Governance-transaction authorization.
pub struct RightsEnforcement {
    roster: Arc<dyn RosterProvider>,
}

impl RightsEnforcement {
    pub fn new(roster: Arc<dyn RosterProvider>) -> Self {
        Self { roster }
    }

    /// Whether a transaction is subject to governance authorization.
    pub fn is_governance(tx: &Transaction) -> bool {
        tx.blueprint_id == GOVERNANCE_BLUEPRINT_ID
            || tx.metadata.get(CONTROL_METADATA_KEY).map(String::as_str)
                == Some(CONTROL_METADATA_VALUE)
    }

    /// Whether a transaction is the roster-establishing genesis control
    /// transaction. Structural requirements only: the genesis action with
    /// a roster payload attached.
    pub fn is_genesis_control(tx: &Transaction) -> bool {
        tx.action_id == GENESIS_CONTROL_ACTION && tx.payload.get("roster").is_some()
    }

    /// Authorize one transaction. An empty result means pass.
    pub async fn check(&self, tx: &Transaction) -> Vec<ValidationError> {
        if !Self::is_governance(tx) {
            return Vec::new();
        }

        let roster = match self.roster.load_roster(&tx.register_id).await {
            Ok(roster) => roster,
            Err(e) if e.is_transient() => {
                return vec![ValidationError::chain_transient(format!(
                    "roster unavailable: {e}"
                ))]
            }
            Err(e) => return vec![ValidationError::internal(format!("roster load failed: {e}"))],
        };

        let Some(roster) = roster else {
            // Bootstrap path: the first governance transaction of a
            // register establishes the roster.
            if Self::is_genesis_control(tx) {
                return Vec::new();
            }
            return vec![ValidationError::roster_missing(&tx.register_id)];
        };

        let Some(signer_key) = tx.signatures.first().map(|s| s.public_key.as_slice()) else {
            return vec![ValidationError::signer_not_in_roster()];
        };

        let role = match roster.role_for_key(signer_key) {
            Some(role) => role,
            None => return vec![ValidationError::signer_not_in_roster()],
        };

        if role == AdminRole::Auditor {
            return vec![ValidationError::auditor_cannot_govern()];
        }

        if let Some(op_value) = tx.payload.get("governance_operation") {
            let op: GovernanceOperation = match serde_json::from_value(op_value.clone()) {
                Ok(op) => op,
                Err(e) => {
                    return vec![ValidationError::invalid_governance_operation(format!(
                        "malformed governance operation: {e}"
                    ))]
                }
            };

            if let Err(reason) = roster.validate_proposal(&op) {
                return vec![ValidationError::invalid_governance_operation(reason)];
            }

            if role != AdminRole::Owner && !roster.has_quorum(&op) {
                return vec![ValidationError::quorum_not_met()];
            }
        }

        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
