//! # Validation Engine
//!
//! The pre-admission pipeline every transaction passes before it may
//! enter the mempool or a docket. Categories run cheapest-first and
//! short-circuit on failure in single-transaction mode:
//!
//! 1. **Structure** — required fields and signature completeness.
//! 2. **Timing** — clock skew, age, expiry.
//! 3. **Payload hash** — canonical SHA-256 recomputation.
//! 4. **Schema** — blueprint lookup and JSON Schema evaluation.
//! 5. **Signature** — algorithm resolution and wallet-side verification.
//! 6. **Chain** — register chain-link consistency and fork prevention.
//! 7. **Rights** — governance authorization against the admin roster.
//!
//! Batch mode validates every transaction fully and independently; one
//! rotten transaction in a docket must not mask the report on the next.

pub mod error;
pub mod receiver;
pub mod rights;
pub mod schema;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::blueprint::BlueprintCache;
use crate::model::{SignatureAlgorithm, Transaction};
use crate::services::{RegisterStore, ServiceError, WalletClient};

pub use error::{ErrorCategory, ValidationError};
pub use receiver::{ReceiveOutcome, TransactionReceiver};
pub use rights::{RightsEnforcement, RosterProvider};

// ---------------------------------------------------------------------------
// Configuration, report, stats
// ---------------------------------------------------------------------------

/// Engine tuning parameters.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Evaluate blueprint JSON Schemas. Disabled deployments still run
    /// every other category.
    pub schema_validation_enabled: bool,
    /// Tolerated future skew on `created_at`.
    pub max_clock_skew: Duration,
    /// Maximum accepted transaction age.
    pub max_transaction_age: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_validation_enabled: true,
            max_clock_skew: crate::config::MAX_CLOCK_SKEW,
            max_transaction_age: crate::config::MAX_TRANSACTION_AGE,
        }
    }
}

/// Outcome of validating one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tx_id: String,
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn passed(tx_id: &str) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(tx_id: &str, errors: Vec<ValidationError>) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            is_valid: false,
            errors,
        }
    }

    /// Whether every error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        !self.is_valid && self.errors.iter().all(|e| !e.is_fatal)
    }
}

/// Aggregate engine counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_validated: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub in_progress: u64,
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The validation pipeline.
pub struct ValidationEngine {
    blueprints: Arc<BlueprintCache>,
    store: Arc<dyn RegisterStore>,
    wallet: Arc<dyn WalletClient>,
    rights: RightsEnforcement,
    config: ValidationConfig,
    total_validated: AtomicU64,
    total_successful: AtomicU64,
    total_failed: AtomicU64,
    in_progress: AtomicU64,
}

impl ValidationEngine {
    pub fn new(
        blueprints: Arc<BlueprintCache>,
        store: Arc<dyn RegisterStore>,
        wallet: Arc<dyn WalletClient>,
        rights: RightsEnforcement,
        config: ValidationConfig,
    ) -> Self {
        Self {
            blueprints,
            store,
            wallet,
            rights,
            config,
            total_validated: AtomicU64::new(0),
            total_successful: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            in_progress: AtomicU64::new(0),
        }
    }

    /// Validate one transaction, short-circuiting at the first failing
    /// category.
    #[instrument(skip_all, fields(tx = %tx.tx_id, register = %tx.register_id))]
    pub async fn validate(&self, tx: &Transaction) -> ValidationReport {
        self.in_progress.fetch_add(1, Ordering::Relaxed);
        let report = self.run_pipeline(tx).await;
        self.in_progress.fetch_sub(1, Ordering::Relaxed);

        self.total_validated.fetch_add(1, Ordering::Relaxed);
        if report.is_valid {
            self.total_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
            debug!(errors = report.errors.len(), "transaction failed validation");
        }
        report
    }

    /// Validate a batch. Every transaction gets a full report; nothing
    /// short-circuits across transactions.
    pub async fn validate_batch(&self, txs: &[Transaction]) -> Vec<ValidationReport> {
        let mut reports = Vec::with_capacity(txs.len());
        for tx in txs {
            reports.push(self.validate(tx).await);
        }
        reports
    }

    /// Structural checks only — the follower vote path re-runs these
    /// against docket contents without paying for chain or schema
    /// round-trips.
    pub fn validate_structure(&self, tx: &Transaction) -> Vec<ValidationError> {
        check_structure(tx)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ValidationStats {
        let total = self.total_validated.load(Ordering::Relaxed);
        let ok = self.total_successful.load(Ordering::Relaxed);
        ValidationStats {
            total_validated: total,
            total_successful: ok,
            total_failed: self.total_failed.load(Ordering::Relaxed),
            in_progress: self.in_progress.load(Ordering::Relaxed),
            success_rate: if total == 0 {
                0.0
            } else {
                ok as f64 / total as f64
            },
        }
    }

    async fn run_pipeline(&self, tx: &Transaction) -> ValidationReport {
        let structure = check_structure(tx);
        if !structure.is_empty() {
            return ValidationReport::failed(&tx.tx_id, structure);
        }

        let timing = self.check_timing(tx);
        if !timing.is_empty() {
            return ValidationReport::failed(&tx.tx_id, timing);
        }

        let hash = check_payload_hash(tx);
        if !hash.is_empty() {
            return ValidationReport::failed(&tx.tx_id, hash);
        }

        if self.config.schema_validation_enabled {
            let schema = self.check_schema(tx).await;
            if !schema.is_empty() {
                return ValidationReport::failed(&tx.tx_id, schema);
            }
        }

        let signatures = self.check_signatures(tx).await;
        if !signatures.is_empty() {
            return ValidationReport::failed(&tx.tx_id, signatures);
        }

        let chain = self.check_chain(tx).await;
        if !chain.is_empty() {
            return ValidationReport::failed(&tx.tx_id, chain);
        }

        let rights = self.rights.check(tx).await;
        if !rights.is_empty() {
            return ValidationReport::failed(&tx.tx_id, rights);
        }

        ValidationReport::passed(&tx.tx_id)
    }

    // -- Timing -------------------------------------------------------------

    fn check_timing(&self, tx: &Transaction) -> Vec<ValidationError> {
        let now = Utc::now();
        let skew = chrono::Duration::from_std(self.config.max_clock_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let max_age = chrono::Duration::from_std(self.config.max_transaction_age)
            .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut errors = Vec::new();
        if tx.created_at > now + skew {
            errors.push(ValidationError::created_in_future(format!(
                "created_at {} is beyond the {}s clock-skew allowance",
                tx.created_at.to_rfc3339(),
                skew.num_seconds()
            )));
        }
        if tx.created_at < now - max_age {
            errors.push(ValidationError::too_old(format!(
                "created_at {} is older than the {}s admission window",
                tx.created_at.to_rfc3339(),
                max_age.num_seconds()
            )));
        }
        if let Some(expires) = tx.expires_at {
            if expires < now {
                errors.push(ValidationError::already_expired(format!(
                    "expires_at {} is in the past",
                    expires.to_rfc3339()
                )));
            }
        }
        errors
    }

    // -- Schema -------------------------------------------------------------

    async fn check_schema(&self, tx: &Transaction) -> Vec<ValidationError> {
        // Control and governance transactions are validated by the
        // control processor and rights enforcement; they carry no
        // numeric blueprint action.
        if tx.is_control() || RightsEnforcement::is_governance(tx) {
            return Vec::new();
        }

        let blueprint = match self.blueprints.get(&tx.blueprint_id).await {
            Ok(Some(blueprint)) => blueprint,
            Ok(None) => return vec![ValidationError::blueprint_not_found(&tx.blueprint_id)],
            Err(e) if e.is_transient() => {
                return vec![ValidationError::chain_transient(format!(
                    "blueprint service unavailable: {e}"
                ))]
            }
            Err(e) => return vec![ValidationError::internal(format!("blueprint fetch: {e}"))],
        };

        let action_id: i64 = match tx.action_id.parse() {
            Ok(id) => id,
            Err(_) => return vec![ValidationError::action_not_numeric(&tx.action_id)],
        };

        let Some(action) = blueprint.action(action_id) else {
            return vec![ValidationError::action_not_in_blueprint(
                action_id,
                &tx.blueprint_id,
            )];
        };

        schema::validate_payload(action, &tx.payload)
    }

    // -- Signatures ---------------------------------------------------------

    async fn check_signatures(&self, tx: &Transaction) -> Vec<ValidationError> {
        let digest = tx.signing_digest();
        let mut errors = Vec::new();

        for (index, sig) in tx.signatures.iter().enumerate() {
            let Some(algorithm) = SignatureAlgorithm::from_name(&sig.algorithm) else {
                errors.push(ValidationError::unknown_algorithm(&sig.algorithm));
                continue;
            };

            match self
                .wallet
                .verify(&sig.public_key, &sig.signature_value, algorithm.name(), &digest)
                .await
            {
                Ok(true) => {}
                Ok(false) => errors.push(ValidationError::signature_invalid(format!(
                    "signature {index} does not verify"
                ))),
                Err(e) if e.is_transient() => errors.push(ValidationError::chain_transient(
                    format!("wallet service unavailable: {e}"),
                )),
                Err(e) => errors.push(ValidationError::signature_invalid(format!(
                    "signature {index}: {e}"
                ))),
            }
        }
        errors
    }

    // -- Chain --------------------------------------------------------------

    async fn check_chain(&self, tx: &Transaction) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // Register chain-link consistency, visible to this proposer.
        match self.store.register_height(&tx.register_id).await {
            Ok(height) if height >= 1 => match self.check_chain_link(&tx.register_id).await {
                Ok(mut link_errors) => errors.append(&mut link_errors),
                Err(e) if e.is_transient() => {
                    errors.push(ValidationError::chain_transient(format!(
                        "register storage unavailable: {e}"
                    )));
                }
                Err(e) => errors.push(ValidationError::chain_link_missing(format!(
                    "chain read failed: {e}"
                ))),
            },
            Ok(_) => {} // Empty or unknown-height register: genesis path.
            Err(e) if e.is_transient() => errors.push(ValidationError::chain_transient(format!(
                "register storage unavailable: {e}"
            ))),
            Err(e) => errors.push(ValidationError::chain_link_missing(format!(
                "height read failed: {e}"
            ))),
        }

        // Per-transaction linearity and fork prevention.
        if let Some(previous_tx_id) = &tx.previous_tx_id {
            match self
                .store
                .get_transaction(&tx.register_id, previous_tx_id)
                .await
            {
                Ok(Some(_)) => {
                    match self
                        .store
                        .successors_by_prev(&tx.register_id, previous_tx_id, 0, 1)
                        .await
                    {
                        Ok(successors) if successors.is_empty() => {}
                        Ok(_) => errors.push(ValidationError::chain_fork(previous_tx_id)),
                        Err(e) if e.is_transient() => {
                            errors.push(ValidationError::chain_transient(format!(
                                "successor lookup unavailable: {e}"
                            )))
                        }
                        Err(e) => errors.push(ValidationError::previous_tx_lookup_failed(format!(
                            "successor lookup: {e}"
                        ))),
                    }
                }
                Ok(None) => errors.push(ValidationError::previous_tx_not_found(previous_tx_id)),
                Err(e) if e.is_transient() => errors.push(ValidationError::chain_transient(
                    format!("transaction lookup unavailable: {e}"),
                )),
                Err(e) => errors.push(ValidationError::previous_tx_lookup_failed(e.to_string())),
            }
        }

        errors
    }

    async fn check_chain_link(&self, register_id: &str) -> Result<Vec<ValidationError>, ServiceError> {
        let Some(latest) = self.store.read_latest_docket(register_id).await? else {
            return Ok(vec![ValidationError::chain_link_missing(format!(
                "register {register_id} reports a height but has no latest docket"
            ))]);
        };
        if latest.docket_number == 0 {
            return Ok(Vec::new());
        }

        let Some(previous) = self
            .store
            .read_docket(register_id, latest.docket_number - 1)
            .await?
        else {
            return Ok(vec![ValidationError::chain_link_missing(format!(
                "docket {} of register {register_id} not found",
                latest.docket_number - 1
            ))]);
        };

        if latest.previous_hash.as_deref() != Some(previous.docket_hash.as_str()) {
            return Ok(vec![ValidationError::chain_link_mismatch(format!(
                "docket {} previous_hash does not match docket {} hash",
                latest.docket_number, previous.docket_number
            ))]);
        }
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Structure checks (free function: no engine state involved)
// ---------------------------------------------------------------------------

fn check_structure(tx: &Transaction) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if tx.tx_id.trim().is_empty() {
        errors.push(ValidationError::structure(1, "tx_id is required", "tx_id"));
    }
    if tx.register_id.trim().is_empty() {
        errors.push(ValidationError::structure(
            2,
            "register_id is required",
            "register_id",
        ));
    }
    if tx.blueprint_id.trim().is_empty() {
        errors.push(ValidationError::structure(
            3,
            "blueprint_id is required",
            "blueprint_id",
        ));
    }
    if tx.action_id.trim().is_empty() {
        errors.push(ValidationError::structure(
            4,
            "action_id is required",
            "action_id",
        ));
    }
    if tx.payload_hash.trim().is_empty() {
        errors.push(ValidationError::structure(
            5,
            "payload_hash is required",
            "payload_hash",
        ));
    }
    if tx.signatures.is_empty() {
        errors.push(ValidationError::structure(
            6,
            "at least one signature is required",
            "signatures",
        ));
    }
    for (index, sig) in tx.signatures.iter().enumerate() {
        if sig.public_key.is_empty() {
            errors.push(ValidationError::structure(
                7,
                format!("signature {index} has an empty public key"),
                "signatures",
            ));
        }
        if sig.signature_value.is_empty() {
            errors.push(ValidationError::structure(
                8,
                format!("signature {index} has empty signature bytes"),
                "signatures",
            ));
        }
        if sig.algorithm.trim().is_empty() {
            errors.push(ValidationError::structure(
                9,
                format!("signature {index} has no algorithm"),
                "signatures",
            ));
        }
    }

    errors
}

fn check_payload_hash(tx: &Transaction) -> Vec<ValidationError> {
    let expected = crate::crypto::payload_hash_hex(&tx.payload);
    if !expected.eq_ignore_ascii_case(&tx.payload_hash) {
        return vec![ValidationError::payload_hash_mismatch(
            &expected,
            &tx.payload_hash,
        )];
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Blueprint, BlueprintAction, Priority, Signature};
    use crate::services::{
        Ed25519Wallet, InMemoryBlueprintService, InMemoryRegisterStore, WalletClient,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct NoRoster;

    #[async_trait]
    impl rights::RosterProvider for NoRoster {
        async fn load_roster(
            &self,
            _register_id: &str,
        ) -> Result<Option<crate::model::AdminRoster>, ServiceError> {
            Ok(None)
        }
    }

    struct Harness {
        engine: ValidationEngine,
        wallet: Arc<Ed25519Wallet>,
        store: Arc<InMemoryRegisterStore>,
        blueprints: Arc<InMemoryBlueprintService>,
    }

    fn harness() -> Harness {
        let blueprints = Arc::new(InMemoryBlueprintService::new());
        blueprints.publish(Blueprint {
            blueprint_id: "bp-1".to_string(),
            title: "Settlement".to_string(),
            version: 1,
            participants: vec![],
            actions: vec![BlueprintAction {
                action_id: 1,
                title: "Offer".to_string(),
                data_schemas: vec![json!({
                    "type": "object",
                    "required": ["amount"],
                    "properties": {"amount": {"type": "integer"}}
                })],
                sender_participants: vec![],
            }],
        });

        let store = Arc::new(InMemoryRegisterStore::new());
        let wallet = Arc::new(Ed25519Wallet::new());
        let cache = Arc::new(BlueprintCache::new(
            Arc::clone(&blueprints) as Arc<dyn crate::services::BlueprintService>
        ));

        let engine = ValidationEngine::new(
            cache,
            Arc::clone(&store) as Arc<dyn RegisterStore>,
            Arc::clone(&wallet) as Arc<dyn WalletClient>,
            RightsEnforcement::new(Arc::new(NoRoster)),
            ValidationConfig::default(),
        );

        Harness {
            engine,
            wallet,
            store,
            blueprints,
        }
    }

    async fn signed_tx(h: &Harness, id: &str, payload: serde_json::Value) -> Transaction {
        let mut tx = Transaction {
            tx_id: id.to_string(),
            register_id: "reg-1".to_string(),
            blueprint_id: "bp-1".to_string(),
            action_id: "1".to_string(),
            payload_hash: crate::crypto::payload_hash_hex(&payload),
            payload,
            previous_tx_id: None,
            created_at: Utc::now(),
            expires_at: None,
            priority: Priority::Normal,
            signatures: Vec::new(),
            metadata: BTreeMap::new(),
            added_at: None,
            retry_count: 0,
        };
        let wallet_id = h
            .wallet
            .create_or_retrieve_system_wallet("client")
            .await
            .unwrap();
        let sig = h.wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures.push(Signature {
            public_key: sig.public_key,
            signature_value: sig.signature,
            algorithm: sig.algorithm,
            signed_at: Utc::now(),
            signed_by: Some(sig.signed_by),
        });
        tx
    }

    fn codes(report: &ValidationReport) -> Vec<&str> {
        report.errors.iter().map(|e| e.code.as_str()).collect()
    }

    // -- Structure ----------------------------------------------------------

    #[tokio::test]
    async fn all_missing_fields_reported_together() {
        let h = harness();
        let tx = Transaction {
            tx_id: String::new(),
            register_id: String::new(),
            blueprint_id: "bp-1".to_string(),
            action_id: "1".to_string(),
            payload: json!({}),
            payload_hash: "abc".to_string(),
            previous_tx_id: None,
            created_at: Utc::now(),
            expires_at: None,
            priority: Priority::Normal,
            signatures: Vec::new(),
            metadata: BTreeMap::new(),
            added_at: None,
            retry_count: 0,
        };

        let report = h.engine.validate(&tx).await;
        assert!(!report.is_valid);
        let codes = codes(&report);
        assert!(codes.contains(&"VAL_STRUCT_001"));
        assert!(codes.contains(&"VAL_STRUCT_002"));
        assert!(codes.contains(&"VAL_STRUCT_006"));
    }

    #[tokio::test]
    async fn incomplete_signature_fields_reported() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.signatures[0].public_key.clear();
        tx.signatures[0].algorithm.clear();

        let report = h.engine.validate(&tx).await;
        let codes = codes(&report);
        assert!(codes.contains(&"VAL_STRUCT_007"));
        assert!(codes.contains(&"VAL_STRUCT_009"));
    }

    // -- Timing -------------------------------------------------------------

    #[tokio::test]
    async fn future_created_at_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.created_at = Utc::now() + chrono::Duration::minutes(10);
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_TIME_001"]);
    }

    #[tokio::test]
    async fn stale_created_at_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.created_at = Utc::now() - chrono::Duration::days(3);
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_TIME_002"]);
    }

    #[tokio::test]
    async fn expired_transaction_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_TIME_003"]);
    }

    // -- Payload hash --------------------------------------------------------

    #[tokio::test]
    async fn tampered_payload_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.payload = json!({"amount": 500});
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_HASH_001"]);
    }

    // -- Schema --------------------------------------------------------------

    #[tokio::test]
    async fn unknown_blueprint_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.blueprint_id = "bp-ghost".to_string();
        tx.payload_hash = crate::crypto::payload_hash_hex(&tx.payload);
        // Re-sign: blueprint_id is inside the signing digest.
        let wallet_id = h.wallet.create_or_retrieve_system_wallet("client").await.unwrap();
        let sig = h.wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures[0].public_key = sig.public_key;
        tx.signatures[0].signature_value = sig.signature;

        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_SCHEMA_001"]);
    }

    #[tokio::test]
    async fn non_numeric_action_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.action_id = "offer".to_string();
        let wallet_id = h.wallet.create_or_retrieve_system_wallet("client").await.unwrap();
        let sig = h.wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures[0].public_key = sig.public_key;
        tx.signatures[0].signature_value = sig.signature;

        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_SCHEMA_002"]);
    }

    #[tokio::test]
    async fn action_not_in_blueprint_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.action_id = "99".to_string();
        let wallet_id = h.wallet.create_or_retrieve_system_wallet("client").await.unwrap();
        let sig = h.wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures[0].public_key = sig.public_key;
        tx.signatures[0].signature_value = sig.signature;

        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_SCHEMA_003"]);
    }

    #[tokio::test]
    async fn schema_violation_rejected_with_path() {
        let h = harness();
        let tx = signed_tx(&h, "tx-1", json!({"amount": "not-an-int"})).await;
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_SCHEMA_004"]);
        assert_eq!(report.errors[0].field.as_deref(), Some("/amount"));
    }

    // -- Signatures -----------------------------------------------------------

    #[tokio::test]
    async fn unknown_algorithm_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.signatures[0].algorithm = "RSA-2048".to_string();
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_SIG_001"]);
    }

    #[tokio::test]
    async fn corrupted_signature_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.signatures[0].signature_value[0] ^= 0xFF;
        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_SIG_002"]);
    }

    // -- Chain -----------------------------------------------------------------

    #[tokio::test]
    async fn unknown_previous_tx_rejected() {
        let h = harness();
        let mut tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        tx.previous_tx_id = Some("tx-ghost".to_string());
        let wallet_id = h.wallet.create_or_retrieve_system_wallet("client").await.unwrap();
        let sig = h.wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures[0].public_key = sig.public_key;
        tx.signatures[0].signature_value = sig.signature;

        let report = h.engine.validate(&tx).await;
        assert_eq!(codes(&report), vec!["VAL_CHAIN_002"]);
    }

    #[tokio::test]
    async fn fork_detected() {
        let h = harness();

        // Commit a parent and a child claiming it.
        let parent = signed_tx(&h, "tx-parent", json!({"amount": 1})).await;
        let mut child = signed_tx(&h, "tx-child", json!({"amount": 2})).await;
        child.previous_tx_id = Some("tx-parent".to_string());

        let mut docket = crate::model::Docket {
            docket_id: "dk-0".to_string(),
            register_id: "reg-1".to_string(),
            docket_number: 0,
            previous_hash: None,
            docket_hash: String::new(),
            merkle_root: String::new(),
            created_at: Utc::now(),
            transactions: vec![parent, child],
            proposer_validator_id: "v1".to_string(),
            proposer_term: 1,
            proposer_signature: None,
            status: crate::model::DocketStatus::Confirmed,
            votes: Vec::new(),
            metadata: BTreeMap::new(),
            consensus_achieved_at: None,
        };
        docket.merkle_root = docket.compute_merkle_root();
        docket.docket_hash = docket.compute_hash();
        h.store.append_docket(&docket).await.unwrap();

        // A second claimant of tx-parent is a fork.
        let mut rival = signed_tx(&h, "tx-rival", json!({"amount": 3})).await;
        rival.previous_tx_id = Some("tx-parent".to_string());
        let wallet_id = h.wallet.create_or_retrieve_system_wallet("client").await.unwrap();
        let sig = h.wallet.sign(&wallet_id, &rival.signing_digest()).await.unwrap();
        rival.signatures[0].public_key = sig.public_key;
        rival.signatures[0].signature_value = sig.signature;

        let report = h.engine.validate(&rival).await;
        assert_eq!(codes(&report), vec!["VAL_CHAIN_FORK"]);
    }

    // -- Happy path & stats ----------------------------------------------------

    #[tokio::test]
    async fn valid_transaction_passes_and_stats_track() {
        let h = harness();
        let tx = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        let report = h.engine.validate(&tx).await;
        assert!(report.is_valid, "errors: {:?}", report.errors);

        let mut bad = signed_tx(&h, "tx-2", json!({"amount": 5})).await;
        bad.payload = json!({"amount": 6});
        h.engine.validate(&bad).await;

        let stats = h.engine.stats();
        assert_eq!(stats.total_validated, 2);
        assert_eq!(stats.total_successful, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.in_progress, 0);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn batch_reports_every_transaction() {
        let h = harness();
        let good = signed_tx(&h, "tx-1", json!({"amount": 5})).await;
        let mut bad = signed_tx(&h, "tx-2", json!({"amount": 5})).await;
        bad.payload = json!({"tampered": true});

        let reports = h.engine.validate_batch(&[bad, good]).await;
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].is_valid);
        assert!(reports[1].is_valid);
    }

    #[tokio::test]
    async fn schema_disabled_skips_blueprint_lookup() {
        let h = harness();
        let config = ValidationConfig {
            schema_validation_enabled: false,
            ..ValidationConfig::default()
        };
        let engine = ValidationEngine::new(
            Arc::new(BlueprintCache::new(
                Arc::clone(&h.blueprints) as Arc<dyn crate::services::BlueprintService>
            )),
            Arc::clone(&h.store) as Arc<dyn RegisterStore>,
            Arc::clone(&h.wallet) as Arc<dyn WalletClient>,
            RightsEnforcement::new(Arc::new(NoRoster)),
            config,
        );

        let mut tx = signed_tx(&h, "tx-1", json!({"amount": "wrong-type"})).await;
        tx.blueprint_id = "bp-unknown".to_string();
        let wallet_id = h.wallet.create_or_retrieve_system_wallet("client").await.unwrap();
        let sig = h.wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures[0].public_key = sig.public_key;
        tx.signatures[0].signature_value = sig.signature;

        let report = engine.validate(&tx).await;
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }
}
