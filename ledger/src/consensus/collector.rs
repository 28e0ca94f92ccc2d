//! Signature collection: the vote fan-out of a consensus round.
//!
//! The proposer's own Approve is recorded first, then every other active
//! validator is asked to vote concurrently. Responses are tallied as they
//! arrive and collection stops at the earliest of:
//!
//! - the threshold being met (strictly more than the configured fraction),
//! - approval becoming unreachable even if every outstanding validator
//!   approved,
//! - every validator having answered,
//! - the overall round deadline,
//! - cancellation.
//!
//! Every returned signature is independently verified against the docket
//! hash before it counts; a vote with a bad signature is discarded and
//! its validator treated as a non-responder — an unverifiable Approve is
//! worth exactly nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::builder::docket_signing_bytes;
use crate::config::ConsensusConfig;
use crate::model::{ConsensusVote, Docket, Signature, ValidatorInfo, VoteDecision};
use crate::services::{PeerService, ServiceError, WalletClient};

/// Outcome of one collection run.
#[derive(Debug, Clone)]
pub struct SignatureCollectionResult {
    /// Verified votes, in arrival order (proposer first).
    pub signatures: Vec<ConsensusVote>,
    pub threshold_met: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub total_validators: usize,
    pub responses_received: usize,
    pub approvals: usize,
    pub rejections: usize,
    /// Validators that produced no usable response before collection
    /// stopped.
    pub non_responders: Vec<String>,
    /// validator_id → rejection reason, for Reject votes that carried
    /// one.
    pub rejection_details: HashMap<String, String>,
    pub duration: Duration,
}

/// Collects signed votes for proposed dockets.
pub struct SignatureCollector {
    peers: Arc<dyn PeerService>,
    wallet: Arc<dyn WalletClient>,
    self_id: String,
}

impl SignatureCollector {
    pub fn new(
        peers: Arc<dyn PeerService>,
        wallet: Arc<dyn WalletClient>,
        self_id: impl Into<String>,
    ) -> Self {
        Self {
            peers,
            wallet,
            self_id: self_id.into(),
        }
    }

    /// Run one collection round.
    ///
    /// `validators` is the full queried set including the proposer; the
    /// threshold denominator is its length. `cancel` flipping to true
    /// stops collection with `cancelled = true` and no further tallying.
    pub async fn collect(
        &self,
        docket: &Docket,
        validators: &[ValidatorInfo],
        config: &ConsensusConfig,
        cancel: watch::Receiver<bool>,
    ) -> SignatureCollectionResult {
        let started = Instant::now();
        let deadline = started + config.docket_timeout();
        let total = validators.len();

        let mut result = SignatureCollectionResult {
            signatures: Vec::new(),
            threshold_met: false,
            timed_out: false,
            cancelled: *cancel.borrow(),
            total_validators: total,
            responses_received: 0,
            approvals: 0,
            rejections: 0,
            non_responders: Vec::new(),
            rejection_details: HashMap::new(),
            duration: Duration::ZERO,
        };

        if result.cancelled {
            result.duration = started.elapsed();
            return result;
        }

        // The proposer's own Approve always opens the tally.
        match self.self_vote(docket).await {
            Ok(vote) => {
                result.signatures.push(vote);
                result.responses_received += 1;
                result.approvals += 1;
            }
            Err(e) => {
                warn!(docket = %docket.docket_id, error = %e, "proposer self-vote failed");
            }
        }

        let mut outstanding: Vec<String> = Vec::new();
        let mut requests = FuturesUnordered::new();
        for validator in validators
            .iter()
            .filter(|v| v.validator_id != self.self_id)
        {
            outstanding.push(validator.validator_id.clone());
            let peers = Arc::clone(&self.peers);
            let validator = validator.clone();
            let docket = docket.clone();
            let per_call = config.vote_timeout();
            requests.push(async move {
                let response =
                    tokio::time::timeout(per_call, peers.request_vote(&validator, &docket)).await;
                (validator.validator_id, response)
            });
        }

        // Resolves when cancellation fires; never resolves if the sender
        // is dropped (an abandoned cancel handle must not stop the round).
        let mut cancel = cancel;
        let cancelled = async move {
            loop {
                if cancel.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *cancel.borrow() {
                    return;
                }
            }
        };
        tokio::pin!(cancelled);

        result.threshold_met = config.threshold_met(result.approvals, total);

        while !result.threshold_met && !requests.is_empty() {
            // Approval unreachable: even unanimous outstanding approvals
            // would not cross the threshold.
            if !config.threshold_met(result.approvals + outstanding.len(), total) {
                debug!(docket = %docket.docket_id, approvals = result.approvals,
                    rejections = result.rejections, "approval unreachable, stopping early");
                break;
            }

            let next = tokio::select! {
                next = requests.next() => next,
                _ = tokio::time::sleep_until(deadline) => {
                    result.timed_out = true;
                    break;
                }
                _ = &mut cancelled => {
                    result.cancelled = true;
                    break;
                }
            };

            let Some((validator_id, response)) = next else {
                break;
            };
            outstanding.retain(|id| id != &validator_id);

            match response {
                Ok(Ok(vote)) => {
                    if self.verify_vote(docket, &validator_id, &vote).await {
                        result.responses_received += 1;
                        match vote.decision {
                            VoteDecision::Approve => result.approvals += 1,
                            VoteDecision::Reject => {
                                result.rejections += 1;
                                if let Some(reason) = &vote.rejection_reason {
                                    result
                                        .rejection_details
                                        .insert(validator_id.clone(), reason.clone());
                                }
                            }
                        }
                        result.signatures.push(vote);
                    } else {
                        warn!(docket = %docket.docket_id, validator = %validator_id,
                            "vote signature failed verification, discarding");
                        result.non_responders.push(validator_id);
                    }
                }
                Ok(Err(e)) => {
                    debug!(docket = %docket.docket_id, validator = %validator_id,
                        error = %e, "vote request failed");
                    result.non_responders.push(validator_id);
                }
                Err(_) => {
                    debug!(docket = %docket.docket_id, validator = %validator_id,
                        "vote request timed out");
                    result.non_responders.push(validator_id);
                }
            }

            result.threshold_met = config.threshold_met(result.approvals, total);
        }

        // Whoever we stopped waiting on is a non-responder for this round.
        result.non_responders.extend(outstanding);
        result.duration = started.elapsed();

        info!(docket = %docket.docket_id, approvals = result.approvals,
            rejections = result.rejections, total, threshold_met = result.threshold_met,
            timed_out = result.timed_out, cancelled = result.cancelled,
            non_responders = result.non_responders.len(),
            duration_ms = result.duration.as_millis() as u64, "signature collection finished");
        result
    }

    async fn self_vote(&self, docket: &Docket) -> Result<ConsensusVote, ServiceError> {
        let wallet_id = self
            .wallet
            .create_or_retrieve_system_wallet(&self.self_id)
            .await?;
        let signed = self
            .wallet
            .sign(&wallet_id, docket_signing_bytes(&docket.docket_hash))
            .await?;
        Ok(ConsensusVote {
            vote_id: Uuid::new_v4().to_string(),
            docket_id: docket.docket_id.clone(),
            validator_id: self.self_id.clone(),
            decision: VoteDecision::Approve,
            voted_at: Utc::now(),
            docket_hash: docket.docket_hash.clone(),
            validator_signature: Signature {
                public_key: signed.public_key,
                signature_value: signed.signature,
                algorithm: signed.algorithm,
                signed_at: Utc::now(),
                signed_by: Some(signed.signed_by),
            },
            rejection_reason: None,
            is_initiator: true,
        })
    }

    /// A usable vote names the right docket and carries a signature that
    /// verifies over our docket hash.
    async fn verify_vote(&self, docket: &Docket, validator_id: &str, vote: &ConsensusVote) -> bool {
        if vote.validator_id != validator_id {
            return false;
        }
        if vote.docket_hash != docket.docket_hash {
            return false;
        }
        let sig = &vote.validator_signature;
        matches!(
            self.wallet
                .verify(
                    &sig.public_key,
                    &sig.signature_value,
                    &sig.algorithm,
                    docket_signing_bytes(&docket.docket_hash),
                )
                .await,
            Ok(true)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
