//! # HTTP Ingress API
//!
//! The validator node's client-facing surface, built as an axum router.
//! All handlers share state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                       | Description                     |
//! |--------|--------------------------------------------|---------------------------------|
//! | GET    | `/health`                                  | Liveness probe                  |
//! | GET    | `/status`                                  | Node status summary             |
//! | POST   | `/api/v1/transactions/validate`            | Validate and admit a transaction|
//! | GET    | `/api/v1/transactions/mempool/{register}`  | Mempool statistics              |
//!
//! Binary fields (public keys, signatures) are base64 inside the JSON
//! envelopes — the transaction body is the ledger's wire format
//! verbatim.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use meridian_ledger::mempool::{MemPool, MemPoolStats};
use meridian_ledger::model::Transaction;
use meridian_ledger::validation::TransactionReceiver;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Shared application state for all request handlers. Cheap to clone —
/// everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub network: String,
    pub validator_id: String,
    pub registers: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub receiver: Arc<TransactionReceiver>,
    pub mempool: Arc<MemPool>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the full router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/api/v1/transactions/validate", post(validate_handler))
        .route(
            "/api/v1/transactions/mempool/:register_id",
            get(mempool_stats_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

/// Envelope for the validate endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    pub added: bool,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `/status` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    pub validator_id: String,
    pub registers: Vec<String>,
    pub pending_transactions: usize,
    pub uptime_seconds: i64,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pending = state
        .registers
        .iter()
        .map(|register| state.mempool.count(register))
        .sum();
    let now = chrono::Utc::now();

    Json(StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        validator_id: state.validator_id.clone(),
        registers: state.registers.clone(),
        pending_transactions: pending,
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339(),
    })
}

/// `POST /api/v1/transactions/validate`
///
/// - 200: validated and admitted (or already known, with `added = false`)
/// - 400: validation failed; `errors` lists every reason found
/// - 409: valid but the mempool refused admission
async fn validate_handler(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> impl IntoResponse {
    let outcome = state.receiver.receive(tx).await;

    if outcome.accepted {
        state.metrics.transactions_admitted_total.inc();
        return (
            StatusCode::OK,
            Json(ValidateResponse {
                is_valid: true,
                added: true,
                transaction_id: outcome.transaction_id,
                errors: Vec::new(),
                message: None,
            }),
        );
    }

    if outcome.already_known {
        return (
            StatusCode::OK,
            Json(ValidateResponse {
                is_valid: true,
                added: false,
                transaction_id: outcome.transaction_id,
                errors: Vec::new(),
                message: Some("transaction already known".to_string()),
            }),
        );
    }

    state.metrics.transactions_rejected_total.inc();

    // A mempool refusal is the one rejection where the transaction itself
    // was valid.
    let mempool_refused = outcome
        .validation_errors
        .first()
        .map(|e| e.contains("memory pool"))
        .unwrap_or(false);
    if mempool_refused {
        return (
            StatusCode::CONFLICT,
            Json(ValidateResponse {
                is_valid: true,
                added: false,
                transaction_id: outcome.transaction_id,
                errors: Vec::new(),
                message: Some("memory pool rejected the transaction".to_string()),
            }),
        );
    }

    (
        StatusCode::BAD_REQUEST,
        Json(ValidateResponse {
            is_valid: false,
            added: false,
            transaction_id: outcome.transaction_id,
            errors: outcome.validation_errors,
            message: None,
        }),
    )
}

/// `GET /api/v1/transactions/mempool/{register_id}`
async fn mempool_stats_handler(
    State(state): State<AppState>,
    Path(register_id): Path<String>,
) -> Json<MemPoolStats> {
    Json(state.mempool.stats(&register_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    use meridian_ledger::blueprint::BlueprintCache;
    use meridian_ledger::mempool::verified_queue::VerifiedQueue;
    use meridian_ledger::mempool::MemPoolConfig;
    use meridian_ledger::model::{Blueprint, BlueprintAction, Priority, Signature};
    use meridian_ledger::services::{
        BlueprintService, Ed25519Wallet, InMemoryBlueprintService, InMemoryRegisterStore,
        RegisterStore, ServiceError, WalletClient,
    };
    use meridian_ledger::validation::rights::{RightsEnforcement, RosterProvider};
    use meridian_ledger::validation::{ValidationConfig, ValidationEngine};

    struct NoRoster;

    #[async_trait]
    impl RosterProvider for NoRoster {
        async fn load_roster(
            &self,
            _register_id: &str,
        ) -> Result<Option<meridian_ledger::model::AdminRoster>, ServiceError> {
            Ok(None)
        }
    }

    struct Harness {
        router: Router,
        wallet: Arc<Ed25519Wallet>,
        mempool: Arc<MemPool>,
    }

    fn harness() -> Harness {
        let blueprints = Arc::new(InMemoryBlueprintService::new());
        blueprints.publish(Blueprint {
            blueprint_id: "bp-1".to_string(),
            title: "Test".to_string(),
            version: 1,
            participants: vec![],
            actions: vec![BlueprintAction {
                action_id: 1,
                title: "Act".to_string(),
                data_schemas: vec![],
                sender_participants: vec![],
            }],
        });
        let wallet = Arc::new(Ed25519Wallet::new());
        let mempool = Arc::new(MemPool::new(MemPoolConfig::default()));

        let engine = Arc::new(ValidationEngine::new(
            Arc::new(BlueprintCache::new(blueprints as Arc<dyn BlueprintService>)),
            Arc::new(InMemoryRegisterStore::new()) as Arc<dyn RegisterStore>,
            Arc::clone(&wallet) as Arc<dyn WalletClient>,
            RightsEnforcement::new(Arc::new(NoRoster)),
            ValidationConfig::default(),
        ));
        let receiver = Arc::new(TransactionReceiver::new(
            engine,
            Arc::new(VerifiedQueue::default()),
            Arc::clone(&mempool),
        ));

        let state = AppState {
            version: "0.1.0-test".to_string(),
            network: "devnet".to_string(),
            validator_id: "v1".to_string(),
            registers: vec!["reg-1".to_string()],
            started_at: Utc::now(),
            receiver,
            mempool: Arc::clone(&mempool),
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
        };

        Harness {
            router: create_router(state),
            wallet,
            mempool,
        }
    }

    async fn signed_tx(wallet: &Ed25519Wallet, id: &str, payload: serde_json::Value) -> Transaction {
        let mut tx = Transaction {
            tx_id: id.to_string(),
            register_id: "reg-1".to_string(),
            blueprint_id: "bp-1".to_string(),
            action_id: "1".to_string(),
            payload_hash: meridian_ledger::crypto::payload_hash_hex(&payload),
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
        let wallet_id = wallet
            .create_or_retrieve_system_wallet("client")
            .await
            .unwrap();
        let sig = wallet.sign(&wallet_id, &tx.signing_digest()).await.unwrap();
        tx.signatures.push(Signature {
            public_key: sig.public_key,
            signature_value: sig.signature,
            algorithm: sig.algorithm,
            signed_at: Utc::now(),
            signed_by: Some(sig.signed_by),
        });
        tx
    }

    async fn post_json(router: Router, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let h = harness();
        let (status, body) = get_json(h.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn valid_transaction_admitted_with_200() {
        let h = harness();
        let tx = signed_tx(&h.wallet, "tx-1", json!({"n": 1})).await;
        let (status, body) = post_json(
            h.router,
            "/api/v1/transactions/validate",
            serde_json::to_string(&tx).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], true);
        assert_eq!(body["added"], true);
        assert_eq!(body["transactionId"], "tx-1");
        assert!(h.mempool.contains("reg-1", "tx-1"));
    }

    #[tokio::test]
    async fn invalid_transaction_rejected_with_400() {
        let h = harness();
        let mut tx = signed_tx(&h.wallet, "tx-1", json!({"n": 1})).await;
        tx.signatures[0].signature_value[0] ^= 0xFF;

        let (status, body) = post_json(
            h.router,
            "/api/v1/transactions/validate",
            serde_json::to_string(&tx).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["isValid"], false);
        assert!(!body["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mempool_refusal_returns_409() {
        let h = harness();
        // Pre-seat the tx_id so admission is refused for the resubmission.
        let tx = signed_tx(&h.wallet, "tx-1", json!({"n": 1})).await;
        h.mempool.add("reg-1", tx);

        let resubmit = signed_tx(&h.wallet, "tx-1", json!({"n": 2})).await;
        let (status, body) = post_json(
            h.router,
            "/api/v1/transactions/validate",
            serde_json::to_string(&resubmit).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["isValid"], true);
        assert_eq!(body["added"], false);
        assert!(body["message"].as_str().unwrap().contains("memory pool"));
    }

    #[tokio::test]
    async fn duplicate_submission_reports_already_known() {
        let h = harness();
        let tx = signed_tx(&h.wallet, "tx-1", json!({"n": 1})).await;
        let body_text = serde_json::to_string(&tx).unwrap();

        let (status, _) = post_json(
            h.router.clone(),
            "/api/v1/transactions/validate",
            body_text.clone(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            post_json(h.router, "/api/v1/transactions/validate", body_text).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], false);
        assert!(body["message"].as_str().unwrap().contains("already known"));
    }

    #[tokio::test]
    async fn mempool_stats_endpoint() {
        let h = harness();
        let tx = signed_tx(&h.wallet, "tx-1", json!({"n": 1})).await;
        h.mempool.add("reg-1", tx);

        let (status, body) = get_json(h.router, "/api/v1/transactions/mempool/reg-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["register_id"], "reg-1");
        assert_eq!(body["total"], 1);
        assert_eq!(body["normal"], 1);
    }

    #[tokio::test]
    async fn status_reports_pending_and_uptime() {
        let h = harness();
        let (status, body) = get_json(h.router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["network"], "devnet");
        assert_eq!(body["validator_id"], "v1");
        assert_eq!(body["pending_transactions"], 0);
    }
}
