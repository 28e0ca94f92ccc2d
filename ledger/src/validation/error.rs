//! Validation error codes.
//!
//! Every admission failure carries a stable machine-readable code, a
//! human-readable message, the category that produced it, an optional
//! offending field path, and a fatality flag. Codes are part of the API
//! surface — client integrations match on them — so they are constructed
//! through the helpers below rather than by hand.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The validation category that produced an error.
///
/// Categories also drive short-circuiting: single-transaction validation
/// stops at the first failing category, batch validation collects per
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Structure,
    Timing,
    Schema,
    Cryptographic,
    Chain,
    Permission,
    Blueprint,
    Internal,
    Transient,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Structure => "Structure",
            Self::Timing => "Timing",
            Self::Schema => "Schema",
            Self::Cryptographic => "Cryptographic",
            Self::Chain => "Chain",
            Self::Permission => "Permission",
            Self::Blueprint => "Blueprint",
            Self::Internal => "Internal",
            Self::Transient => "Transient",
        };
        write!(f, "{name}")
    }
}

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Stable code, e.g. `VAL_STRUCT_001`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Producing category.
    pub category: ErrorCategory,
    /// JSON path or field name the error points at, where applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Fatal errors reject the transaction; non-fatal errors (Transient)
    /// invite a retry.
    pub is_fatal: bool,
}

impl ValidationError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            category,
            field: None,
            is_fatal: !matches!(category, ErrorCategory::Transient),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    // -- Structure ----------------------------------------------------------

    pub fn structure(index: u32, message: impl Into<String>, field: &str) -> Self {
        Self::new(
            format!("VAL_STRUCT_{index:03}"),
            message,
            ErrorCategory::Structure,
        )
        .with_field(field)
    }

    // -- Timing -------------------------------------------------------------

    pub fn created_in_future(message: impl Into<String>) -> Self {
        Self::new("VAL_TIME_001", message, ErrorCategory::Timing).with_field("created_at")
    }

    pub fn too_old(message: impl Into<String>) -> Self {
        Self::new("VAL_TIME_002", message, ErrorCategory::Timing).with_field("created_at")
    }

    pub fn already_expired(message: impl Into<String>) -> Self {
        Self::new("VAL_TIME_003", message, ErrorCategory::Timing).with_field("expires_at")
    }

    // -- Payload hash -------------------------------------------------------

    pub fn payload_hash_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            "VAL_HASH_001",
            format!("payload hash mismatch: expected {expected}, got {actual}"),
            ErrorCategory::Cryptographic,
        )
        .with_field("payload_hash")
    }

    // -- Schema -------------------------------------------------------------

    pub fn blueprint_not_found(blueprint_id: &str) -> Self {
        Self::new(
            "VAL_SCHEMA_001",
            format!("blueprint {blueprint_id} not found"),
            ErrorCategory::Blueprint,
        )
        .with_field("blueprint_id")
    }

    pub fn action_not_numeric(action_id: &str) -> Self {
        Self::new(
            "VAL_SCHEMA_002",
            format!("action id {action_id} is not numeric"),
            ErrorCategory::Schema,
        )
        .with_field("action_id")
    }

    pub fn action_not_in_blueprint(action_id: i64, blueprint_id: &str) -> Self {
        Self::new(
            "VAL_SCHEMA_003",
            format!("action {action_id} not defined by blueprint {blueprint_id}"),
            ErrorCategory::Schema,
        )
        .with_field("action_id")
    }

    pub fn schema_violation(path: &str, message: impl Into<String>) -> Self {
        Self::new("VAL_SCHEMA_004", message, ErrorCategory::Schema).with_field(path)
    }

    pub fn schema_unparseable(message: impl Into<String>) -> Self {
        Self::new("VAL_SCHEMA_005", message, ErrorCategory::Schema)
    }

    // -- Signature ----------------------------------------------------------

    pub fn unknown_algorithm(algorithm: &str) -> Self {
        Self::new(
            "VAL_SIG_001",
            format!("unknown signature algorithm: {algorithm}"),
            ErrorCategory::Cryptographic,
        )
        .with_field("signatures")
    }

    pub fn signature_invalid(detail: impl Into<String>) -> Self {
        Self::new("VAL_SIG_002", detail, ErrorCategory::Cryptographic).with_field("signatures")
    }

    // -- Chain --------------------------------------------------------------

    pub fn previous_tx_lookup_failed(detail: impl Into<String>) -> Self {
        Self::new("VAL_CHAIN_001", detail, ErrorCategory::Chain).with_field("previous_tx_id")
    }

    pub fn previous_tx_not_found(previous_tx_id: &str) -> Self {
        Self::new(
            "VAL_CHAIN_002",
            format!("previous transaction {previous_tx_id} not found in register"),
            ErrorCategory::Chain,
        )
        .with_field("previous_tx_id")
    }

    pub fn chain_link_missing(detail: impl Into<String>) -> Self {
        Self::new("VAL_CHAIN_003", detail, ErrorCategory::Chain)
    }

    pub fn chain_link_mismatch(detail: impl Into<String>) -> Self {
        Self::new("VAL_CHAIN_004", detail, ErrorCategory::Chain)
    }

    pub fn chain_fork(previous_tx_id: &str) -> Self {
        Self::new(
            "VAL_CHAIN_FORK",
            format!("transaction chain fork: {previous_tx_id} already has a committed successor"),
            ErrorCategory::Chain,
        )
        .with_field("previous_tx_id")
    }

    pub fn chain_transient(detail: impl Into<String>) -> Self {
        Self::new("VAL_CHAIN_TRANSIENT", detail, ErrorCategory::Transient)
    }

    // -- Permission ---------------------------------------------------------

    pub fn roster_missing(register_id: &str) -> Self {
        Self::new(
            "VAL_PERM_001",
            format!("no admin roster exists for register {register_id}"),
            ErrorCategory::Permission,
        )
    }

    pub fn signer_not_in_roster() -> Self {
        Self::new(
            "VAL_PERM_002",
            "signer is not a member of the admin roster",
            ErrorCategory::Permission,
        )
    }

    pub fn auditor_cannot_govern() -> Self {
        Self::new(
            "VAL_PERM_003",
            "auditors may not submit governance transactions",
            ErrorCategory::Permission,
        )
    }

    pub fn invalid_governance_operation(detail: impl Into<String>) -> Self {
        Self::new("VAL_PERM_004", detail, ErrorCategory::Permission)
    }

    pub fn quorum_not_met() -> Self {
        Self::new(
            "VAL_PERM_005",
            "governance operation has not met roster quorum",
            ErrorCategory::Permission,
        )
    }

    // -- Internal -----------------------------------------------------------

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new("VAL_INTERNAL_001", detail, ErrorCategory::Internal)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field: {field})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!ValidationError::chain_transient("storage unreachable").is_fatal);
        assert!(ValidationError::chain_fork("tx-1").is_fatal);
        assert!(ValidationError::structure(1, "missing tx_id", "tx_id").is_fatal);
    }

    #[test]
    fn structure_codes_are_zero_padded() {
        let err = ValidationError::structure(3, "msg", "field");
        assert_eq!(err.code, "VAL_STRUCT_003");
    }

    #[test]
    fn display_includes_code_and_field() {
        let err = ValidationError::payload_hash_mismatch("aa", "bb");
        let text = err.to_string();
        assert!(text.contains("VAL_HASH_001"));
        assert!(text.contains("payload_hash"));
    }

    #[test]
    fn serde_roundtrip() {
        let err = ValidationError::schema_violation("/amount", "required field missing");
        let json = serde_json::to_string(&err).unwrap();
        let back: ValidationError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
