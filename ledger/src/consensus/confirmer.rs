//! Follower-side verification of gossiped confirmed dockets.
//!
//! A confirmed docket arriving over gossip is applied to local state only
//! after it survives this gauntlet. The critical check is leadership: the
//! claimed proposer must be exactly the leader its term maps to. A docket
//! signed by a registered validator that was NOT the leader for its term
//! is an impersonation attempt and is both rejected and reported.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use super::builder::docket_signing_bytes;
use super::leader::LeaderElection;
use crate::events::{EventBus, LedgerEvent};
use crate::model::Docket;
use crate::registry::ValidatorRegistry;
use crate::services::{BehaviorKind, PeerService, WalletClient};
use crate::validation::ValidationEngine;

/// Why a confirmed docket was refused.
#[derive(Debug, Error)]
pub enum DocketRejection {
    #[error("invalid docket structure: {0}")]
    InvalidDocketStructure(String),
    #[error("docket term {proposer_term} outside the accepted window around {current_term}")]
    InvalidTerm {
        proposer_term: u64,
        current_term: u64,
    },
    #[error("unauthorized initiator: {0}")]
    UnauthorizedInitiator(String),
    #[error("invalid sequence number: {0}")]
    InvalidSequenceNumber(u64),
    #[error("merkle root does not match docket transactions")]
    MerkleRootMismatch,
    #[error("docket hash does not match commitment fields")]
    DocketHashMismatch,
    #[error("proposer signature does not verify")]
    InvalidProposerSignature,
    #[error("transaction {0} failed validation")]
    InvalidTransaction(String),
    #[error("verification could not complete: {0}")]
    Internal(String),
}

/// Confirmer tuning.
#[derive(Debug, Clone)]
pub struct DocketConfirmerConfig {
    pub max_clock_skew: std::time::Duration,
    pub max_docket_age: std::time::Duration,
    /// Re-verify the proposer signature (costs a wallet round-trip).
    pub verify_proposer_signature: bool,
    /// Re-run structural validation on every carried transaction.
    pub verify_transactions: bool,
}

impl Default for DocketConfirmerConfig {
    fn default() -> Self {
        Self {
            max_clock_skew: crate::config::MAX_CLOCK_SKEW,
            max_docket_age: crate::config::MAX_DOCKET_AGE,
            verify_proposer_signature: true,
            verify_transactions: true,
        }
    }
}

/// Per-register confirmed-docket verifier.
pub struct DocketConfirmer {
    registry: Arc<ValidatorRegistry>,
    leader: Arc<LeaderElection>,
    wallet: Arc<dyn WalletClient>,
    peers: Arc<dyn PeerService>,
    validation: Arc<ValidationEngine>,
    events: EventBus,
    config: DocketConfirmerConfig,
}

impl DocketConfirmer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        leader: Arc<LeaderElection>,
        wallet: Arc<dyn WalletClient>,
        peers: Arc<dyn PeerService>,
        validation: Arc<ValidationEngine>,
        events: EventBus,
        config: DocketConfirmerConfig,
    ) -> Self {
        Self {
            registry,
            leader,
            wallet,
            peers,
            validation,
            events,
            config,
        }
    }

    /// Verify a gossiped confirmed docket. `Ok(())` means it is safe to
    /// apply and persist.
    pub async fn confirm(&self, docket: &Docket) -> Result<(), DocketRejection> {
        if docket.docket_id.trim().is_empty() {
            return Err(DocketRejection::InvalidDocketStructure(
                "docket_id is required".to_string(),
            ));
        }
        if docket.register_id.trim().is_empty() {
            return Err(DocketRejection::InvalidDocketStructure(
                "register_id is required".to_string(),
            ));
        }

        // Term window: exactly one election may separate us from the
        // proposer. Further out, the docket is stale or from the future.
        let current_term = self.leader.current_term();
        let distance = current_term.abs_diff(docket.proposer_term);
        if distance > 1 {
            return Err(DocketRejection::InvalidTerm {
                proposer_term: docket.proposer_term,
                current_term,
            });
        }

        let registered = self
            .registry
            .is_registered(&docket.register_id, &docket.proposer_validator_id)
            .map_err(|e| DocketRejection::Internal(e.to_string()))?;
        if !registered {
            return Err(DocketRejection::UnauthorizedInitiator(format!(
                "{} is not registered for register {}",
                docket.proposer_validator_id, docket.register_id
            )));
        }

        let expected_leader = self
            .leader
            .leader_for_term(docket.proposer_term)
            .map_err(|e| DocketRejection::Internal(e.to_string()))?;
        if expected_leader.as_deref() != Some(docket.proposer_validator_id.as_str()) {
            let expected = expected_leader.unwrap_or_else(|| "<none>".to_string());
            warn!(register = %docket.register_id, term = docket.proposer_term,
                claimed = %docket.proposer_validator_id, expected = %expected,
                "leader impersonation detected");
            self.events.emit(LedgerEvent::LeaderImpersonation {
                register_id: docket.register_id.clone(),
                term: docket.proposer_term,
                claimed_proposer: docket.proposer_validator_id.clone(),
                expected_leader: expected.clone(),
            });
            if let Err(e) = self
                .peers
                .report_behavior(
                    &docket.proposer_validator_id,
                    BehaviorKind::LeaderImpersonation,
                    &format!(
                        "claimed leadership of term {} (leader was {expected})",
                        docket.proposer_term
                    ),
                )
                .await
            {
                debug!(error = %e, "behavior report failed");
            }
            return Err(DocketRejection::UnauthorizedInitiator(format!(
                "{} was not the leader for term {}",
                docket.proposer_validator_id, docket.proposer_term
            )));
        }

        let now = Utc::now();
        let skew = chrono::Duration::from_std(self.config.max_clock_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let max_age = chrono::Duration::from_std(self.config.max_docket_age)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        if docket.created_at > now + skew {
            return Err(DocketRejection::InvalidDocketStructure(format!(
                "created_at {} is in the future",
                docket.created_at.to_rfc3339()
            )));
        }
        if docket.created_at < now - max_age {
            return Err(DocketRejection::InvalidDocketStructure(format!(
                "created_at {} is older than the acceptance window",
                docket.created_at.to_rfc3339()
            )));
        }

        if docket.docket_number > 0 && docket.previous_hash.is_none() {
            return Err(DocketRejection::InvalidDocketStructure(format!(
                "docket {} has no previous hash",
                docket.docket_number
            )));
        }
        if docket.docket_number == 0 && docket.previous_hash.is_some() {
            // A genesis claiming a parent breaks genesis uniqueness.
            return Err(DocketRejection::InvalidSequenceNumber(docket.docket_number));
        }

        if docket.compute_merkle_root() != docket.merkle_root {
            return Err(DocketRejection::MerkleRootMismatch);
        }
        if docket.compute_hash() != docket.docket_hash {
            return Err(DocketRejection::DocketHashMismatch);
        }

        if self.config.verify_proposer_signature {
            let Some(signature) = &docket.proposer_signature else {
                return Err(DocketRejection::InvalidProposerSignature);
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
                Ok(false) => return Err(DocketRejection::InvalidProposerSignature),
                Err(e) => return Err(DocketRejection::Internal(e.to_string())),
            }
        }

        if self.config.verify_transactions {
            for tx in &docket.transactions {
                if !self.validation.validate_structure(tx).is_empty() {
                    return Err(DocketRejection::InvalidTransaction(tx.tx_id.clone()));
                }
            }
        }

        debug!(register = %docket.register_id, docket = %docket.docket_id,
            "confirmed docket verified");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
