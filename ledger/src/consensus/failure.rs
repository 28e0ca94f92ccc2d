//! Consensus failure handling: retry, abandon, and transaction recovery.
//!
//! A failed round is not the end of a docket. The handler re-examines the
//! collection result (the threshold may have been met in a race), retries
//! with a refreshed validator set while the retry budget lasts, and
//! finally abandons: the docket is stamped Rejected and its transactions
//! go back to the mempool to be bundled into a future docket.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use super::collector::{SignatureCollectionResult, SignatureCollector};
use super::pending::PendingDocketStore;
use crate::mempool::MemPool;
use crate::model::{Docket, DocketStatus};
use crate::registry::{RegisterConfigStore, ValidatorRegistry};

/// What the handler decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// The round had actually met the threshold; nothing to do.
    NoActionNeeded,
    /// A fresh collection round was attempted.
    Retry,
    /// The retry budget is exhausted; the docket is terminally rejected.
    Abandon,
}

/// Outcome of failure handling.
#[derive(Debug, Clone)]
pub struct FailureOutcome {
    pub action: FailureAction,
    /// For Retry: whether the retry achieved consensus. For
    /// NoActionNeeded and Abandon: the handling itself completed.
    pub succeeded: bool,
    /// The docket after handling (Confirmed on a successful retry,
    /// Rejected on abandon).
    pub updated_docket: Docket,
    /// Transactions returned to the mempool (abandon path).
    pub transactions_returned: usize,
    /// Total consensus attempts recorded on the docket.
    pub attempts: u32,
}

/// Errors from explicit abandon calls.
#[derive(Debug, Error)]
pub enum FailureError {
    #[error("abandon reason must not be empty")]
    EmptyReason,
}

/// Retry / abandon lifecycle for failed consensus rounds.
pub struct ConsensusFailureHandler {
    collector: SignatureCollector,
    mempool: Arc<MemPool>,
    registry: Arc<ValidatorRegistry>,
    config: Arc<RegisterConfigStore>,
    pending: Arc<PendingDocketStore>,
}

impl ConsensusFailureHandler {
    pub fn new(
        collector: SignatureCollector,
        mempool: Arc<MemPool>,
        registry: Arc<ValidatorRegistry>,
        config: Arc<RegisterConfigStore>,
        pending: Arc<PendingDocketStore>,
    ) -> Self {
        Self {
            collector,
            mempool,
            registry,
            config,
            pending,
        }
    }

    /// Handle the aftermath of a failed round.
    pub async fn handle_failure(
        &self,
        mut docket: Docket,
        collection: &SignatureCollectionResult,
        cancel: watch::Receiver<bool>,
    ) -> FailureOutcome {
        // Raced success: the collector met the threshold after the caller
        // had already given up on the round.
        if collection.threshold_met {
            return FailureOutcome {
                action: FailureAction::NoActionNeeded,
                succeeded: true,
                attempts: docket.retry_count(),
                transactions_returned: 0,
                updated_docket: docket,
            };
        }

        let config = match self.config.get(&docket.register_id) {
            Ok(config) => config,
            Err(e) => {
                warn!(docket = %docket.docket_id, error = %e,
                    "config unavailable during failure handling, abandoning");
                return self.abandon(docket, "configuration unavailable");
            }
        };

        let attempts = docket.retry_count();
        if attempts >= config.max_retries {
            info!(docket = %docket.docket_id, attempts, "retry budget exhausted, abandoning");
            return self.abandon(docket, "consensus retry budget exhausted");
        }

        // Retry with fresh state: the validator set or configuration may
        // have changed underneath the failed round.
        docket.set_retry_count(attempts + 1);
        for tx in &mut docket.transactions {
            tx.retry_count += 1;
        }
        self.registry.refresh(&docket.register_id);
        self.config.refresh(&docket.register_id);

        let validators = match self.registry.active_ordered(&docket.register_id) {
            Ok(validators) if !validators.is_empty() => validators,
            Ok(_) => {
                warn!(docket = %docket.docket_id, "no validators on retry");
                return FailureOutcome {
                    action: FailureAction::Retry,
                    succeeded: false,
                    attempts: attempts + 1,
                    transactions_returned: 0,
                    updated_docket: docket,
                };
            }
            Err(e) => {
                warn!(docket = %docket.docket_id, error = %e, "validator refresh failed on retry");
                return FailureOutcome {
                    action: FailureAction::Retry,
                    succeeded: false,
                    attempts: attempts + 1,
                    transactions_returned: 0,
                    updated_docket: docket,
                };
            }
        };

        let retry = self
            .collector
            .collect(&docket, &validators, &config, cancel)
            .await;

        if retry.threshold_met {
            docket.status = DocketStatus::Confirmed;
            docket.consensus_achieved_at = Some(Utc::now());
            docket.votes = retry.signatures;
            self.pending
                .update_status(&docket.docket_id, DocketStatus::Confirmed);
            info!(docket = %docket.docket_id, attempt = attempts + 1, "retry achieved consensus");
            FailureOutcome {
                action: FailureAction::Retry,
                succeeded: true,
                attempts: attempts + 1,
                transactions_returned: 0,
                updated_docket: docket,
            }
        } else {
            info!(docket = %docket.docket_id, attempt = attempts + 1,
                approvals = retry.approvals, "retry did not achieve consensus");
            FailureOutcome {
                action: FailureAction::Retry,
                succeeded: false,
                attempts: attempts + 1,
                transactions_returned: 0,
                updated_docket: docket,
            }
        }
    }

    /// Terminally reject a docket with an explicit reason.
    pub fn abandon_docket(
        &self,
        docket: Docket,
        reason: &str,
    ) -> Result<FailureOutcome, FailureError> {
        if reason.trim().is_empty() {
            return Err(FailureError::EmptyReason);
        }
        Ok(self.abandon(docket, reason))
    }

    /// Return a docket's transactions to the mempool in one bulk call.
    pub fn return_transactions(&self, docket: &Docket) -> usize {
        self.mempool
            .return_transactions(&docket.register_id, docket.transactions.clone())
    }

    fn abandon(&self, mut docket: Docket, reason: &str) -> FailureOutcome {
        docket.status = DocketStatus::Rejected;
        docket
            .metadata
            .insert("rejection_reason".to_string(), reason.to_string());
        self.pending
            .update_status(&docket.docket_id, DocketStatus::Rejected);

        let returned = self.return_transactions(&docket);
        info!(docket = %docket.docket_id, returned, reason, "docket abandoned");

        FailureOutcome {
            action: FailureAction::Abandon,
            succeeded: true,
            attempts: docket.retry_count(),
            transactions_returned: returned,
            updated_docket: docket,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
