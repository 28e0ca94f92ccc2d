//! Peer service client contract.
//!
//! Everything that crosses the network to other validators goes through
//! this trait: docket gossip, validator discovery, vote requests,
//! heartbeats, and misbehavior reports. Transport wiring lives outside
//! the core; consensus only sees these capabilities.

use std::fmt;

use async_trait::async_trait;

use super::ServiceError;
use crate::model::{ConsensusVote, Docket, ValidatorInfo};

/// Category of reported validator misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorKind {
    /// A proposer whose docket was rejected by a majority of validators.
    ProposedInvalidDocket,
    /// A confirmed docket claiming a proposer that was not the leader for
    /// its term.
    LeaderImpersonation,
    /// Repeated failure to answer vote requests within the deadline.
    NonResponsive,
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProposedInvalidDocket => write!(f, "ProposedInvalidDocket"),
            Self::LeaderImpersonation => write!(f, "LeaderImpersonation"),
            Self::NonResponsive => write!(f, "NonResponsive"),
        }
    }
}

/// Network capabilities toward the rest of the cohort.
#[async_trait]
pub trait PeerService: Send + Sync {
    /// Announce a proposed docket ahead of vote collection.
    async fn publish_proposed_docket(
        &self,
        register_id: &str,
        docket_id: &str,
        docket_bytes: &[u8],
    ) -> Result<(), ServiceError>;

    /// Gossip a confirmed docket to the cohort.
    async fn broadcast_confirmed_docket(
        &self,
        register_id: &str,
        docket_id: &str,
        docket_bytes: &[u8],
    ) -> Result<(), ServiceError>;

    /// Discover the validators of a register as the network sees them.
    async fn query_validators(&self, register_id: &str)
        -> Result<Vec<ValidatorInfo>, ServiceError>;

    /// Report observed misbehavior.
    async fn report_behavior(
        &self,
        validator_id: &str,
        kind: BehaviorKind,
        detail: &str,
    ) -> Result<(), ServiceError>;

    /// Ask one validator to vote on a proposed docket. The response
    /// carries the validator's decision and a signature over the docket
    /// hash.
    async fn request_vote(
        &self,
        validator: &ValidatorInfo,
        docket: &Docket,
    ) -> Result<ConsensusVote, ServiceError>;

    /// Leader heartbeat toward one validator.
    async fn send_heartbeat(
        &self,
        validator: &ValidatorInfo,
        sender_id: &str,
        term: u64,
        load: f64,
    ) -> Result<(), ServiceError>;
}

/// A peer service with no peers.
///
/// Used by single-validator dev mode, where publishing is a no-op and no
/// remote votes exist. `request_vote` fails so a caller that reaches it
/// with a supposed peer learns about the misconfiguration.
#[derive(Default)]
pub struct NullPeerService;

impl NullPeerService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerService for NullPeerService {
    async fn publish_proposed_docket(
        &self,
        _register_id: &str,
        _docket_id: &str,
        _docket_bytes: &[u8],
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn broadcast_confirmed_docket(
        &self,
        _register_id: &str,
        _docket_id: &str,
        _docket_bytes: &[u8],
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn query_validators(
        &self,
        _register_id: &str,
    ) -> Result<Vec<ValidatorInfo>, ServiceError> {
        Ok(Vec::new())
    }

    async fn report_behavior(
        &self,
        _validator_id: &str,
        _kind: BehaviorKind,
        _detail: &str,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn request_vote(
        &self,
        validator: &ValidatorInfo,
        _docket: &Docket,
    ) -> Result<ConsensusVote, ServiceError> {
        Err(ServiceError::Transient(format!(
            "no transport to validator {}",
            validator.validator_id
        )))
    }

    async fn send_heartbeat(
        &self,
        _validator: &ValidatorInfo,
        _sender_id: &str,
        _term: u64,
        _load: f64,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}
