//! Transaction receiver: the gossip and client ingress funnel.
//!
//! Everything that arrives from the outside — peer gossip or direct HTTP
//! submissions — lands here. The receiver deduplicates by payload hash
//! (a rolling known-set with retention TTL), decodes, revalidates the
//! payload commitment, runs the full validation pipeline, and buffers the
//! transaction in the verified queue before promoting it into the
//! mempool. Each step that can fail maps to a distinct rejection so a
//! gossiping peer can tell "seen it" apart from "full" apart from
//! "broken".
//!
//! The verified queue is the backpressure valve: when its caps are hit,
//! the submission is refused outright instead of the validator growing
//! without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::ValidationEngine;
use crate::mempool::verified_queue::VerifiedQueue;
use crate::mempool::MemPool;
use crate::model::{Priority, Transaction};

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveOutcome {
    /// The transaction was admitted (mempool, or buffered for
    /// promotion).
    pub accepted: bool,
    /// The payload hash was already in the known-set; nothing was done.
    pub already_known: bool,
    /// Rejection reasons, empty on acceptance.
    pub validation_errors: Vec<String>,
    /// The transaction ID, when the envelope decoded far enough to have
    /// one.
    pub transaction_id: Option<String>,
}

impl ReceiveOutcome {
    fn known(tx_id: Option<String>) -> Self {
        Self {
            accepted: false,
            already_known: true,
            validation_errors: Vec::new(),
            transaction_id: tx_id,
        }
    }

    fn rejected(tx_id: Option<String>, errors: Vec<String>) -> Self {
        Self {
            accepted: false,
            already_known: false,
            validation_errors: errors,
            transaction_id: tx_id,
        }
    }

    fn accepted(tx_id: String) -> Self {
        Self {
            accepted: true,
            already_known: false,
            validation_errors: Vec::new(),
            transaction_id: Some(tx_id),
        }
    }
}

/// Queue priority for a mempool priority class.
fn queue_priority(priority: Priority) -> i32 {
    match priority {
        Priority::High => 2,
        Priority::Normal => 1,
        Priority::Low => 0,
    }
}

/// The ingress funnel.
pub struct TransactionReceiver {
    engine: Arc<ValidationEngine>,
    queue: Arc<VerifiedQueue>,
    mempool: Arc<MemPool>,
    /// payload_hash → first-seen time.
    known: Mutex<HashMap<String, DateTime<Utc>>>,
    retention: Duration,
}

impl TransactionReceiver {
    pub fn new(
        engine: Arc<ValidationEngine>,
        queue: Arc<VerifiedQueue>,
        mempool: Arc<MemPool>,
    ) -> Self {
        Self::with_retention(engine, queue, mempool, crate::config::DEDUP_RETENTION)
    }

    pub fn with_retention(
        engine: Arc<ValidationEngine>,
        queue: Arc<VerifiedQueue>,
        mempool: Arc<MemPool>,
        retention: Duration,
    ) -> Self {
        Self {
            engine,
            queue,
            mempool,
            known: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Receive a raw gossip envelope.
    pub async fn receive_bytes(&self, bytes: &[u8]) -> ReceiveOutcome {
        let tx: Transaction = match serde_json::from_slice(bytes) {
            Ok(tx) => tx,
            Err(e) => {
                debug!(error = %e, "gossip envelope failed to decode");
                return ReceiveOutcome::rejected(None, vec!["decode".to_string()]);
            }
        };
        self.receive(tx).await
    }

    /// Receive a decoded transaction (the HTTP submission path).
    #[instrument(skip_all, fields(tx = %tx.tx_id, register = %tx.register_id))]
    pub async fn receive(&self, tx: Transaction) -> ReceiveOutcome {
        // 1. Dedup by payload hash.
        if self.is_known(&tx.payload_hash) {
            debug!("transaction already known, dropping");
            return ReceiveOutcome::known(Some(tx.tx_id));
        }

        // 2. Recompute the payload commitment before anything expensive.
        let computed = crate::crypto::payload_hash_hex(&tx.payload);
        if !computed.eq_ignore_ascii_case(&tx.payload_hash) {
            return ReceiveOutcome::rejected(
                Some(tx.tx_id),
                vec![format!(
                    "payload hash mismatch: envelope {}, computed {computed}",
                    tx.payload_hash
                )],
            );
        }

        // 3. Full validation pipeline.
        let report = self.engine.validate(&tx).await;
        if !report.is_valid {
            return ReceiveOutcome::rejected(
                Some(tx.tx_id),
                report.errors.iter().map(|e| e.to_string()).collect(),
            );
        }

        // 4. Buffer in the verified queue — the backpressure gate.
        let payload_hash = tx.payload_hash.clone();
        let tx_id = tx.tx_id.clone();
        let register_id = tx.register_id.clone();
        let priority = queue_priority(tx.priority);
        if !self.queue.enqueue(&register_id, tx, priority) {
            return ReceiveOutcome::rejected(
                Some(tx_id),
                vec!["verified queue full".to_string()],
            );
        }

        // 5. Promote buffered transactions into the mempool.
        let promoted = self.promote(&register_id);
        match promoted.get(tx_id.as_str()) {
            Some(true) | None => {
                // Admitted now, or still buffered for a later promotion
                // sweep; either way the submission succeeded.
                self.record_known(payload_hash);
                ReceiveOutcome::accepted(tx_id)
            }
            Some(false) => ReceiveOutcome::rejected(
                Some(tx_id),
                vec!["memory pool rejected the transaction".to_string()],
            ),
        }
    }

    /// Drain the verified queue for one register into the mempool.
    /// Returns per-transaction admission results.
    pub fn promote(&self, register_id: &str) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        loop {
            let batch = self.queue.dequeue(register_id, 64);
            if batch.is_empty() {
                break;
            }
            for tx in batch {
                let tx_id = tx.tx_id.clone();
                let added = self.mempool.add(register_id, tx);
                results.insert(tx_id, added);
            }
        }
        results
    }

    /// Size of the dedup set (after pruning).
    pub fn known_count(&self) -> usize {
        let mut known = self.known.lock();
        Self::prune(&mut known, self.retention);
        known.len()
    }

    fn is_known(&self, payload_hash: &str) -> bool {
        let mut known = self.known.lock();
        Self::prune(&mut known, self.retention);
        known.contains_key(payload_hash)
    }

    fn record_known(&self, payload_hash: String) {
        let mut known = self.known.lock();
        Self::prune(&mut known, self.retention);
        known.insert(payload_hash, Utc::now());
    }

    fn prune(known: &mut HashMap<String, DateTime<Utc>>, retention: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::minutes(10));
        known.retain(|_, seen| *seen >= cutoff);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
