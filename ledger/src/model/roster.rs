//! The admin roster: who may govern a register.
//!
//! Every register carries a set of attestations binding a role to a
//! principal (DID + public key). Control transactions are authorized
//! against this roster: Owners act unilaterally, Admins need quorum,
//! Auditors can only read.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Roles & attestations
// ---------------------------------------------------------------------------

/// Governance role of a roster principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdminRole {
    /// Full authority; bypasses quorum.
    Owner,
    /// May propose governance operations; changes require quorum.
    Admin,
    /// Read-only; any governance submission is rejected.
    Auditor,
}

impl fmt::Display for AdminRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "Owner"),
            Self::Admin => write!(f, "Admin"),
            Self::Auditor => write!(f, "Auditor"),
        }
    }
}

/// One roster entry: a role bound to a principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterAttestation {
    pub role: AdminRole,
    pub subject_did: String,
    #[serde(with = "crate::crypto::b64")]
    pub public_key: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Governance operations
// ---------------------------------------------------------------------------

/// A governance operation carried inside a control transaction payload.
///
/// `approvals` holds the public keys of roster members endorsing the
/// operation; quorum is evaluated against it when the submitter is not an
/// Owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceOperation {
    /// Operation discriminator, e.g. `"add_attestation"`,
    /// `"remove_attestation"`.
    pub op_type: String,
    /// Principal the operation concerns.
    pub subject_did: String,
    /// Role being granted or revoked, where applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AdminRole>,
    /// Base64 public keys of endorsing roster members.
    #[serde(default)]
    pub approvals: Vec<String>,
}

const KNOWN_OPERATIONS: &[&str] = &["add_attestation", "remove_attestation", "update_quorum"];

// ---------------------------------------------------------------------------
// AdminRoster
// ---------------------------------------------------------------------------

/// The complete governance roster of one register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRoster {
    pub register_id: String,
    pub attestations: Vec<RosterAttestation>,
}

impl AdminRoster {
    /// Look up the role bound to a public key.
    pub fn role_for_key(&self, public_key: &[u8]) -> Option<AdminRole> {
        self.attestations
            .iter()
            .find(|a| a.public_key == public_key)
            .map(|a| a.role)
    }

    /// Number of principals that count toward quorum (Owners + Admins).
    pub fn voting_member_count(&self) -> usize {
        self.attestations
            .iter()
            .filter(|a| a.role != AdminRole::Auditor)
            .count()
    }

    /// Structural validation of a proposed governance operation.
    ///
    /// Checks that the operation type is known and its required fields are
    /// present. Authorization (role, quorum) is the caller's concern.
    pub fn validate_proposal(&self, op: &GovernanceOperation) -> Result<(), String> {
        if !KNOWN_OPERATIONS.contains(&op.op_type.as_str()) {
            return Err(format!("unknown governance operation: {}", op.op_type));
        }
        if op.subject_did.trim().is_empty() {
            return Err("governance operation missing subject".to_string());
        }
        if op.op_type == "add_attestation" && op.role.is_none() {
            return Err("add_attestation requires a role".to_string());
        }
        if op.op_type == "remove_attestation" {
            let present = self.attestations.iter().any(|a| a.subject_did == op.subject_did);
            if !present {
                return Err(format!("no attestation for subject {}", op.subject_did));
            }
        }
        Ok(())
    }

    /// Whether an operation has gathered endorsements from a strict
    /// majority of voting members.
    ///
    /// Endorsements from keys outside the roster, from Auditors, or
    /// duplicated within the list do not count.
    pub fn has_quorum(&self, op: &GovernanceOperation) -> bool {
        let voting = self.voting_member_count();
        if voting == 0 {
            return false;
        }

        let mut counted: Vec<Vec<u8>> = Vec::new();
        for approval in &op.approvals {
            let Ok(key) = crate::crypto::b64::decode(approval) else {
                continue;
            };
            match self.role_for_key(&key) {
                Some(AdminRole::Owner) | Some(AdminRole::Admin) => {
                    if !counted.contains(&key) {
                        counted.push(key);
                    }
                }
                _ => {}
            }
        }

        counted.len() * 2 > voting
    }
}
