//! Docket structure and consensus votes.
//!
//! A docket is the unit of consensus within a register: an ordered bundle
//! of transactions, chained to its predecessor by hash, committed to its
//! contents by a Merkle root, and signed by its proposer.
//!
//! ## Hash computation
//!
//! The docket hash covers `register_id || docket_number || previous_hash
//! || merkle_root || created_at || proposer_validator_id`, each field
//! framed with a big-endian u32 length prefix. The proposer signature,
//! votes, and transaction bodies are NOT part of the hash — the Merkle
//! root already commits to the transactions, and the signature signs the
//! hash, not the other way around. `created_at` enters the preimage as an
//! RFC3339 UTC string so the hash survives any serialization round-trip.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::hash::sha256_concat;
use crate::crypto::merkle_root_hex;
use crate::model::transaction::{Signature, Transaction};

// ---------------------------------------------------------------------------
// DocketStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a docket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocketStatus {
    /// Built by a leader, consensus not yet achieved.
    Proposed,
    /// Threshold met; persisted and broadcast.
    Confirmed,
    /// Consensus failed terminally; transactions returned to the mempool.
    Rejected,
}

impl fmt::Display for DocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed => write!(f, "Proposed"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// A validator's decision on a proposed docket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteDecision {
    Approve,
    Reject,
}

impl fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "Approve"),
            Self::Reject => write!(f, "Reject"),
        }
    }
}

/// A signed vote collected during a consensus round.
///
/// The signature covers the docket hash, so a vote cannot be replayed
/// against a different docket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVote {
    /// Unique vote identifier.
    pub vote_id: String,
    /// The docket voted on.
    pub docket_id: String,
    /// The voting validator.
    pub validator_id: String,
    /// Approve or Reject.
    pub decision: VoteDecision,
    /// When the vote was cast.
    pub voted_at: DateTime<Utc>,
    /// Hash of the docket as seen by the voter. Mismatch with the
    /// proposer's hash is itself evidence of disagreement.
    pub docket_hash: String,
    /// Signature over the docket hash.
    pub validator_signature: Signature,
    /// Populated on Reject votes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// True for the proposer's own self-vote.
    #[serde(default)]
    pub is_initiator: bool,
}

// ---------------------------------------------------------------------------
// Docket
// ---------------------------------------------------------------------------

/// A docket: the block of a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Docket {
    /// Unique docket identifier.
    pub docket_id: String,
    /// Owning register.
    pub register_id: String,
    /// Position in the chain; strictly monotonic, genesis = 0.
    pub docket_number: u64,
    /// Hash of the predecessor docket. `None` iff `docket_number == 0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    /// Hex SHA-256 over the commitment fields (see module docs).
    pub docket_hash: String,
    /// Merkle root over the ordered transaction commitment hashes.
    pub merkle_root: String,
    /// When the proposer assembled this docket.
    pub created_at: DateTime<Utc>,
    /// Ordered transactions.
    pub transactions: Vec<Transaction>,
    /// The proposing validator.
    pub proposer_validator_id: String,
    /// Leader-election term the proposer held when building.
    #[serde(default)]
    pub proposer_term: u64,
    /// Proposer's signature over `docket_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer_signature: Option<Signature>,
    /// Lifecycle state.
    pub status: DocketStatus,
    /// Votes collected at consensus time.
    #[serde(default)]
    pub votes: Vec<ConsensusVote>,
    /// Free-form metadata; `retry_count` tracks failed consensus rounds.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// When the threshold was met.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_achieved_at: Option<DateTime<Utc>>,
}

impl Docket {
    /// Recompute the docket hash from the commitment fields.
    ///
    /// Deterministic and serialization-stable: any node holding the same
    /// logical docket computes the same value.
    pub fn compute_hash(&self) -> String {
        compute_docket_hash(
            &self.register_id,
            self.docket_number,
            self.previous_hash.as_deref(),
            &self.merkle_root,
            self.created_at,
            &self.proposer_validator_id,
        )
    }

    /// Recompute the Merkle root from the carried transactions.
    pub fn compute_merkle_root(&self) -> String {
        let hashes: Vec<[u8; 32]> = self
            .transactions
            .iter()
            .map(|tx| tx.commitment_hash())
            .collect();
        merkle_root_hex(&hashes)
    }

    /// The consensus retry count stored in metadata (0 when absent).
    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get("retry_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Record a retry in metadata.
    pub fn set_retry_count(&mut self, count: u32) {
        self.metadata
            .insert("retry_count".to_string(), count.to_string());
    }
}

/// Compute a docket hash from its commitment fields.
///
/// `previous_hash = None` enters the preimage as the empty string, which
/// is unambiguous under length-prefixed framing (a zero-length field is
/// still a field).
pub fn compute_docket_hash(
    register_id: &str,
    docket_number: u64,
    previous_hash: Option<&str>,
    merkle_root: &str,
    created_at: DateTime<Utc>,
    proposer_validator_id: &str,
) -> String {
    let number = docket_number.to_string();
    let created = created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    let previous = previous_hash.unwrap_or("");

    let fields: [&[u8]; 6] = [
        register_id.as_bytes(),
        number.as_bytes(),
        previous.as_bytes(),
        merkle_root.as_bytes(),
        created.as_bytes(),
        proposer_validator_id.as_bytes(),
    ];

    let mut framed: Vec<Vec<u8>> = Vec::with_capacity(fields.len() * 2);
    for field in fields {
        framed.push((field.len() as u32).to_be_bytes().to_vec());
        framed.push(field.to_vec());
    }
    let parts: Vec<&[u8]> = framed.iter().map(|v| v.as_slice()).collect();
    hex::encode(sha256_concat(&parts))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    fn sample_docket() -> Docket {
        Docket {
            docket_id: "dk-1".to_string(),
            register_id: "reg-1".to_string(),
            docket_number: 6,
            previous_hash: Some("H5".to_string()),
            docket_hash: String::new(),
            merkle_root: hex::encode([0u8; 32]),
            created_at: fixed_time(),
            transactions: Vec::new(),
            proposer_validator_id: "v1".to_string(),
            proposer_term: 3,
            proposer_signature: None,
            status: DocketStatus::Proposed,
            votes: Vec::new(),
            metadata: BTreeMap::new(),
            consensus_achieved_at: None,
        }
    }

    #[test]
    fn docket_hash_deterministic() {
        let docket = sample_docket();
        assert_eq!(docket.compute_hash(), docket.compute_hash());
    }

    #[test]
    fn docket_hash_excludes_votes_and_signature() {
        let mut docket = sample_docket();
        let before = docket.compute_hash();

        docket.status = DocketStatus::Confirmed;
        docket.votes.push(ConsensusVote {
            vote_id: "vote-1".to_string(),
            docket_id: "dk-1".to_string(),
            validator_id: "v2".to_string(),
            decision: VoteDecision::Approve,
            voted_at: fixed_time(),
            docket_hash: before.clone(),
            validator_signature: Signature {
                public_key: vec![1; 32],
                signature_value: vec![2; 64],
                algorithm: "ED25519".to_string(),
                signed_at: fixed_time(),
                signed_by: None,
            },
            rejection_reason: None,
            is_initiator: false,
        });

        assert_eq!(before, docket.compute_hash());
    }

    #[test]
    fn docket_hash_covers_each_commitment_field() {
        let base = sample_docket();
        let base_hash = base.compute_hash();

        let mut changed = base.clone();
        changed.docket_number = 7;
        assert_ne!(base_hash, changed.compute_hash());

        let mut changed = base.clone();
        changed.previous_hash = Some("H4".to_string());
        assert_ne!(base_hash, changed.compute_hash());

        let mut changed = base.clone();
        changed.proposer_validator_id = "v2".to_string();
        assert_ne!(base_hash, changed.compute_hash());
    }

    #[test]
    fn null_previous_hash_differs_from_empty_adjacent_field() {
        // None and Some("") frame identically on purpose; what must NOT
        // collide is a value sliding between adjacent fields.
        let a = compute_docket_hash("reg", 0, None, "ab", fixed_time(), "v1");
        let b = compute_docket_hash("reg", 0, Some("ab"), "", fixed_time(), "v1");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_survives_serde_roundtrip() {
        let mut docket = sample_docket();
        docket.docket_hash = docket.compute_hash();

        let json = serde_json::to_string(&docket).unwrap();
        let back: Docket = serde_json::from_str(&json).unwrap();
        assert_eq!(back.compute_hash(), docket.docket_hash);
        assert_eq!(back, docket);
    }

    #[test]
    fn votes_survive_serde_roundtrip_in_order() {
        let mut docket = sample_docket();
        for i in 0..3 {
            docket.votes.push(ConsensusVote {
                vote_id: format!("vote-{i}"),
                docket_id: "dk-1".to_string(),
                validator_id: format!("v{i}"),
                decision: if i == 2 {
                    VoteDecision::Reject
                } else {
                    VoteDecision::Approve
                },
                voted_at: fixed_time(),
                docket_hash: "h".to_string(),
                validator_signature: Signature {
                    public_key: vec![i as u8; 32],
                    signature_value: vec![i as u8; 64],
                    algorithm: "ED25519".to_string(),
                    signed_at: fixed_time(),
                    signed_by: Some(format!("wallet-{i}")),
                },
                rejection_reason: (i == 2).then(|| "bad previous hash".to_string()),
                is_initiator: i == 0,
            });
        }

        let json = serde_json::to_string(&docket).unwrap();
        let back: Docket = serde_json::from_str(&json).unwrap();
        assert_eq!(back.votes.len(), 3);
        assert_eq!(back.votes, docket.votes);
        assert!(back.votes[0].is_initiator);
        assert_eq!(back.votes[2].rejection_reason.as_deref(), Some("bad previous hash"));
    }

    #[test]
    fn retry_count_metadata_roundtrip() {
        let mut docket = sample_docket();
        assert_eq!(docket.retry_count(), 0);
        docket.set_retry_count(2);
        assert_eq!(docket.retry_count(), 2);
    }
}
