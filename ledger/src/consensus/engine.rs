//! Consensus orchestration: the leader round and the follower vote.
//!
//! The leader side (`achieve_consensus`) publishes a proposed docket,
//! fans out vote requests through the collector, and stamps the docket
//! Confirmed when strictly more than the threshold fraction of the
//! queried validator set approved. It never returns an error — every
//! internal failure becomes a `ConsensusResult` with `achieved = false`
//! and a reason, because the tick loop must keep ticking.
//!
//! The follower side (`validate_and_vote`) re-derives every safety
//! predicate the leader claims to have enforced and answers with a
//! signed Approve or a Reject naming the first violated predicate. A
//! follower that cannot complete validation rejects; silence is reserved
//! for being unreachable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::builder::docket_signing_bytes;
use super::collector::{SignatureCollectionResult, SignatureCollector};
use super::pending::PendingDocketStore;
use crate::model::{ConsensusVote, Docket, DocketStatus, Signature, VoteDecision};
use crate::registry::{RegisterConfigStore, ValidatorRegistry};
use crate::services::{BehaviorKind, PeerService, RegisterStore, WalletClient};
use crate::validation::ValidationEngine;

/// Outcome of one leader-side consensus round.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub achieved: bool,
    /// The docket, stamped Confirmed (with votes attached) on success.
    pub docket: Docket,
    pub votes: Vec<ConsensusVote>,
    pub total_validators: usize,
    pub duration: Duration,
    pub failure_reason: Option<String>,
    pub cancelled: bool,
    /// Raw collection result, for the failure handler.
    pub collection: Option<SignatureCollectionResult>,
}

impl ConsensusResult {
    fn failed(docket: Docket, reason: impl Into<String>) -> Self {
        Self {
            achieved: false,
            docket,
            votes: Vec::new(),
            total_validators: 0,
            duration: Duration::ZERO,
            failure_reason: Some(reason.into()),
            cancelled: false,
            collection: None,
        }
    }
}

/// The consensus engine of one validator node.
pub struct ConsensusEngine {
    peers: Arc<dyn PeerService>,
    wallet: Arc<dyn WalletClient>,
    store: Arc<dyn RegisterStore>,
    registry: Arc<ValidatorRegistry>,
    collector: SignatureCollector,
    validation: Arc<ValidationEngine>,
    pending: Arc<PendingDocketStore>,
    config: Arc<RegisterConfigStore>,
    self_id: String,
}

impl ConsensusEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peers: Arc<dyn PeerService>,
        wallet: Arc<dyn WalletClient>,
        store: Arc<dyn RegisterStore>,
        registry: Arc<ValidatorRegistry>,
        validation: Arc<ValidationEngine>,
        pending: Arc<PendingDocketStore>,
        config: Arc<RegisterConfigStore>,
        self_id: impl Into<String>,
    ) -> Self {
        let self_id = self_id.into();
        let collector =
            SignatureCollector::new(Arc::clone(&peers), Arc::clone(&wallet), self_id.clone());
        Self {
            peers,
            wallet,
            store,
            registry,
            collector,
            validation,
            pending,
            config,
            self_id,
        }
    }

    pub fn pending_store(&self) -> &Arc<PendingDocketStore> {
        &self.pending
    }

    pub fn collector(&self) -> &SignatureCollector {
        &self.collector
    }

    // -- Leader side --------------------------------------------------------

    /// Drive one docket through a consensus round.
    pub async fn achieve_consensus(
        &self,
        mut docket: Docket,
        cancel: watch::Receiver<bool>,
    ) -> ConsensusResult {
        let register_id = docket.register_id.clone();

        // Publish is advisory: followers receive the docket again inside
        // every vote request, so a gossip hiccup does not doom the round.
        match serde_json::to_vec(&docket) {
            Ok(bytes) => {
                if let Err(e) = self
                    .peers
                    .publish_proposed_docket(&register_id, &docket.docket_id, &bytes)
                    .await
                {
                    warn!(docket = %docket.docket_id, error = %e, "proposed-docket publish failed");
                }
            }
            Err(e) => return ConsensusResult::failed(docket, format!("docket serialize: {e}")),
        }

        let validators = match self.registry.active_ordered(&register_id) {
            Ok(validators) => validators,
            Err(e) => {
                return ConsensusResult::failed(docket, format!("validator query failed: {e}"))
            }
        };
        if validators.is_empty() {
            return ConsensusResult::failed(docket, "No validators found");
        }

        let config = match self.config.get(&register_id) {
            Ok(config) => config,
            Err(e) => return ConsensusResult::failed(docket, format!("config unavailable: {e}")),
        };

        self.pending.add(docket.clone());

        let collection = self
            .collector
            .collect(&docket, &validators, &config, cancel)
            .await;

        let achieved = collection.threshold_met;
        let total = collection.total_validators;

        if achieved {
            docket.status = DocketStatus::Confirmed;
            docket.consensus_achieved_at = Some(Utc::now());
            docket.votes = collection
                .signatures
                .iter()
                .take(config.max_signatures_per_docket as usize)
                .cloned()
                .collect();
            docket
                .metadata
                .insert("approvals".to_string(), collection.approvals.to_string());
            self.pending
                .update_status(&docket.docket_id, DocketStatus::Confirmed);
            info!(register = %register_id, docket = %docket.docket_id,
                approvals = collection.approvals, total, "consensus achieved");
        } else {
            // A validated rejection from a strict majority means the
            // cohort judged our proposal invalid — report ourselves so
            // the behavior is on the record.
            if config.threshold_met(collection.rejections, total) {
                let detail = format!(
                    "docket {} rejected by {} of {} validators",
                    docket.docket_id, collection.rejections, total
                );
                if let Err(e) = self
                    .peers
                    .report_behavior(&self.self_id, BehaviorKind::ProposedInvalidDocket, &detail)
                    .await
                {
                    warn!(error = %e, "behavior report failed");
                }
            }
            for non_responder in &collection.non_responders {
                self.registry
                    .penalize_reputation(&register_id, non_responder, 0.05);
            }
            info!(register = %register_id, docket = %docket.docket_id,
                approvals = collection.approvals, rejections = collection.rejections, total,
                timed_out = collection.timed_out, cancelled = collection.cancelled,
                "consensus not achieved");
        }

        let failure_reason = if achieved {
            None
        } else if collection.cancelled {
            Some("cancelled".to_string())
        } else if collection.timed_out {
            Some("vote collection timed out".to_string())
        } else {
            Some(format!(
                "approvals {} of {} did not exceed threshold",
                collection.approvals, total
            ))
        };

        ConsensusResult {
            achieved,
            votes: collection.signatures.clone(),
            total_validators: total,
            duration: collection.duration,
            cancelled: collection.cancelled,
            failure_reason,
            collection: Some(collection),
            docket,
        }
    }

    // -- Follower side ------------------------------------------------------

    /// Validate a proposed docket and answer with a signed vote.
    pub async fn validate_and_vote(&self, docket: &Docket) -> ConsensusVote {
        let verdict = self.check_proposal(docket).await;
        match verdict {
            Ok(()) => self.signed_vote(docket, VoteDecision::Approve, None).await,
            Err(reason) => {
                info!(docket = %docket.docket_id, reason = %reason, "rejecting proposed docket");
                self.signed_vote(docket, VoteDecision::Reject, Some(reason))
                    .await
            }
        }
    }

    async fn check_proposal(&self, docket: &Docket) -> Result<(), String> {
        if docket.docket_hash.trim().is_empty() {
            return Err("Missing docket hash".to_string());
        }
        if docket.docket_number > 0 && docket.previous_hash.is_none() {
            return Err("Missing previous hash".to_string());
        }

        // The docket hash itself must be honest before a signature over
        // it means anything.
        if docket.compute_hash() != docket.docket_hash {
            return Err("Docket hash mismatch".to_string());
        }
        if docket.compute_merkle_root() != docket.merkle_root {
            return Err("Merkle root mismatch".to_string());
        }

        let Some(signature) = &docket.proposer_signature else {
            return Err("Invalid proposer signature".to_string());
        };
        match self
            .wallet
            .verify(
                &signature.public_key,
                &signature.signature_value,
                &signature.algorithm,
                docket_signing_bytes(&docket.docket_hash),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err("Invalid proposer signature".to_string()),
            Err(e) => return Err(format!("Validation error: {e}")),
        }

        if docket.docket_number > 0 {
            let previous = self
                .store
                .read_docket(&docket.register_id, docket.docket_number - 1)
                .await
                .map_err(|e| format!("Validation error: {e}"))?;
            let Some(previous) = previous else {
                return Err("Previous docket not found".to_string());
            };
            if docket.previous_hash.as_deref() != Some(previous.docket_hash.as_str()) {
                return Err("Previous hash mismatch".to_string());
            }
        }

        for tx in &docket.transactions {
            if !self.validation.validate_structure(tx).is_empty() {
                return Err(format!("Transaction {} validation failed", tx.tx_id));
            }
        }

        Ok(())
    }

    async fn signed_vote(
        &self,
        docket: &Docket,
        decision: VoteDecision,
        rejection_reason: Option<String>,
    ) -> ConsensusVote {
        let signature = match self.sign_docket_hash(&docket.docket_hash).await {
            Ok(signature) => signature,
            Err(e) => {
                // A vote we cannot sign is still a vote on the wire; the
                // collector on the other end will discard it, which is
                // the correct outcome for a node whose wallet is down.
                warn!(docket = %docket.docket_id, error = %e, "vote signing failed");
                Signature {
                    public_key: Vec::new(),
                    signature_value: Vec::new(),
                    algorithm: String::new(),
                    signed_at: Utc::now(),
                    signed_by: None,
                }
            }
        };

        ConsensusVote {
            vote_id: Uuid::new_v4().to_string(),
            docket_id: docket.docket_id.clone(),
            validator_id: self.self_id.clone(),
            decision,
            voted_at: Utc::now(),
            docket_hash: docket.docket_hash.clone(),
            validator_signature: signature,
            rejection_reason,
            is_initiator: false,
        }
    }

    async fn sign_docket_hash(
        &self,
        docket_hash: &str,
    ) -> Result<Signature, crate::services::ServiceError> {
        let wallet_id = self
            .wallet
            .create_or_retrieve_system_wallet(&self.self_id)
            .await?;
        let signed = self
            .wallet
            .sign(&wallet_id, docket_signing_bytes(docket_hash))
            .await?;
        Ok(Signature {
            public_key: signed.public_key,
            signature_value: signed.signature,
            algorithm: signed.algorithm,
            signed_at: Utc::now(),
            signed_by: Some(signed.signed_by),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
