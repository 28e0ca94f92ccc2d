//! Core transaction types.
//!
//! A transaction is the unit of state change carried within a docket. It
//! references a blueprint (a typed action schema), carries an opaque JSON
//! payload committed by `payload_hash`, and may chain onto a predecessor
//! through `previous_tx_id` — at most one committed successor per
//! predecessor is allowed within a register (the no-fork rule).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::hash::sha256_concat;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Mempool scheduling priority.
///
/// Priority decides bucket placement in the mempool and therefore docket
/// inclusion order. It has no consensus meaning — two validators may hold
/// the same transaction at different priorities without disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Drained last, evicted first.
    Low,
    /// The default.
    Normal,
    /// Drained first; admission above the high-priority quota is
    /// downgraded to Normal.
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Normal => write!(f, "Normal"),
            Self::High => write!(f, "High"),
        }
    }
}

// ---------------------------------------------------------------------------
// SignatureAlgorithm
// ---------------------------------------------------------------------------

/// Signature schemes accepted on the wire.
///
/// Verification is delegated to the wallet service; the node itself only
/// needs to resolve the algorithm name. Unknown names are a validation
/// error, not a panic — envelopes are attacker-controlled input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Ed25519 — the default and the only scheme the in-process dev
    /// wallet implements.
    #[serde(rename = "ED25519")]
    Ed25519,
    /// ML-DSA-65 (FIPS 204 lattice scheme).
    #[serde(rename = "ML-DSA-65")]
    MlDsa65,
    /// SLH-DSA-128S (FIPS 205 hash-based scheme, small variant).
    #[serde(rename = "SLH-DSA-128S")]
    SlhDsa128s,
    /// SLH-DSA-192S.
    #[serde(rename = "SLH-DSA-192S")]
    SlhDsa192s,
}

impl SignatureAlgorithm {
    /// Resolve a wire-format algorithm name. Returns `None` for names we
    /// do not recognize.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ED25519" => Some(Self::Ed25519),
            "ML-DSA-65" => Some(Self::MlDsa65),
            "SLH-DSA-128S" => Some(Self::SlhDsa128s),
            "SLH-DSA-192S" => Some(Self::SlhDsa192s),
            _ => None,
        }
    }

    /// The wire-format name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ED25519",
            Self::MlDsa65 => "ML-DSA-65",
            Self::SlhDsa128s => "SLH-DSA-128S",
            Self::SlhDsa192s => "SLH-DSA-192S",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A detached signature attached to a transaction or docket.
///
/// Byte fields are base64 in JSON. `signed_by` is an optional wallet ID —
/// informational only; the public key is what verification uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Public key of the signer.
    #[serde(with = "crate::crypto::b64")]
    pub public_key: Vec<u8>,
    /// The signature bytes.
    #[serde(with = "crate::crypto::b64")]
    pub signature_value: Vec<u8>,
    /// Signature scheme name, e.g. `"ED25519"`. Kept as a string on the
    /// wire so an envelope with an unknown scheme still decodes and can be
    /// rejected with a proper validation error.
    pub algorithm: String,
    /// When the signature was produced.
    pub signed_at: DateTime<Utc>,
    /// Wallet that produced the signature, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<String>,
}

impl Signature {
    /// Structural completeness: key, value, and algorithm all present.
    pub fn is_complete(&self) -> bool {
        !self.public_key.is_empty()
            && !self.signature_value.is_empty()
            && !self.algorithm.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A ledger transaction.
///
/// `added_at` and `retry_count` are node-local bookkeeping (mempool entry
/// time and consensus retry counter); they are carried in serialization so
/// a docket round-trip preserves them, but they are not part of any hash
/// commitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique, immutable identifier.
    pub tx_id: String,
    /// The register this transaction belongs to.
    pub register_id: String,
    /// Blueprint governing the payload.
    pub blueprint_id: String,
    /// Action within the blueprint. Numeric for ordinary actions;
    /// `control.*` for control transactions.
    pub action_id: String,
    /// Opaque JSON payload.
    pub payload: Value,
    /// Hex SHA-256 over the canonical payload bytes.
    pub payload_hash: String,
    /// Optional predecessor, enforcing per-transaction linearity within
    /// the register.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_tx_id: Option<String>,
    /// Client-supplied creation time.
    pub created_at: DateTime<Utc>,
    /// Optional expiry; expired transactions are swept from the mempool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Mempool scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// At least one signature is required.
    pub signatures: Vec<Signature>,
    /// Free-form string metadata. `transactionType = Control` marks a
    /// governance transaction regardless of blueprint.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// When this node admitted the transaction to its mempool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    /// Consensus retry counter, incremented by the failure handler.
    #[serde(default)]
    pub retry_count: u32,
}

impl Transaction {
    /// The commitment hash of this transaction: the value Merkle leaves
    /// and signatures are computed over.
    ///
    /// Covers the identity and linkage fields plus the payload hash.
    /// Fields are framed with a big-endian u32 length prefix so that no
    /// two field sequences can collide by boundary shifting. Signatures,
    /// priority, and node-local bookkeeping are deliberately excluded —
    /// the hash must be identical on every node that holds the same
    /// logical transaction.
    pub fn commitment_hash(&self) -> [u8; 32] {
        let previous = self.previous_tx_id.as_deref().unwrap_or("");
        let fields: [&[u8]; 6] = [
            self.tx_id.as_bytes(),
            self.register_id.as_bytes(),
            self.blueprint_id.as_bytes(),
            self.action_id.as_bytes(),
            self.payload_hash.as_bytes(),
            previous.as_bytes(),
        ];
        let mut framed: Vec<Vec<u8>> = Vec::with_capacity(fields.len() * 2);
        for field in fields {
            framed.push((field.len() as u32).to_be_bytes().to_vec());
            framed.push(field.to_vec());
        }
        let parts: Vec<&[u8]> = framed.iter().map(|v| v.as_slice()).collect();
        sha256_concat(&parts)
    }

    /// The digest that transaction signatures are verified against.
    pub fn signing_digest(&self) -> [u8; 32] {
        self.commitment_hash()
    }

    /// Whether this is a control transaction (`control.*` action
    /// namespace).
    pub fn is_control(&self) -> bool {
        self.action_id.starts_with("control.")
    }

    /// Whether this transaction has passed its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry < now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_tx(tx_id: &str) -> Transaction {
        let payload = json!({"field": "value"});
        Transaction {
            tx_id: tx_id.to_string(),
            register_id: "reg-1".to_string(),
            blueprint_id: "bp-1".to_string(),
            action_id: "1".to_string(),
            payload_hash: crate::crypto::payload_hash_hex(&payload),
            payload,
            previous_tx_id: None,
            created_at: Utc::now(),
            expires_at: None,
            priority: Priority::Normal,
            signatures: vec![Signature {
                public_key: vec![1; 32],
                signature_value: vec![2; 64],
                algorithm: "ED25519".to_string(),
                signed_at: Utc::now(),
                signed_by: None,
            }],
            metadata: BTreeMap::new(),
            added_at: None,
            retry_count: 0,
        }
    }

    #[test]
    fn commitment_hash_is_deterministic() {
        let tx = sample_tx("tx-1");
        assert_eq!(tx.commitment_hash(), tx.commitment_hash());
    }

    #[test]
    fn commitment_hash_excludes_signatures() {
        let mut tx = sample_tx("tx-1");
        let before = tx.commitment_hash();
        tx.signatures.clear();
        tx.retry_count = 7;
        tx.added_at = Some(Utc::now());
        assert_eq!(before, tx.commitment_hash());
    }

    #[test]
    fn commitment_hash_covers_identity_fields() {
        let a = sample_tx("tx-1");
        let b = sample_tx("tx-2");
        assert_ne!(a.commitment_hash(), b.commitment_hash());

        let mut c = sample_tx("tx-1");
        c.previous_tx_id = Some("tx-0".to_string());
        assert_ne!(a.commitment_hash(), c.commitment_hash());
    }

    #[test]
    fn serde_roundtrip_preserves_all_fields() {
        let mut tx = sample_tx("tx-1");
        tx.previous_tx_id = Some("tx-0".to_string());
        tx.metadata
            .insert("transactionType".to_string(), "Control".to_string());
        tx.retry_count = 2;

        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn control_detection_by_action_namespace() {
        let mut tx = sample_tx("tx-1");
        assert!(!tx.is_control());
        tx.action_id = "control.validator_register".to_string();
        assert!(tx.is_control());
    }

    #[test]
    fn expiry_check() {
        let mut tx = sample_tx("tx-1");
        let now = Utc::now();
        assert!(!tx.is_expired(now));
        tx.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(tx.is_expired(now));
        tx.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!tx.is_expired(now));
    }

    #[test]
    fn signature_algorithm_name_roundtrip() {
        for alg in [
            SignatureAlgorithm::Ed25519,
            SignatureAlgorithm::MlDsa65,
            SignatureAlgorithm::SlhDsa128s,
            SignatureAlgorithm::SlhDsa192s,
        ] {
            assert_eq!(SignatureAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert_eq!(SignatureAlgorithm::from_name("RSA-2048"), None);
    }

    #[test]
    fn incomplete_signature_detected() {
        let mut sig = Signature {
            public_key: vec![1],
            signature_value: vec![2],
            algorithm: "ED25519".to_string(),
            signed_at: Utc::now(),
            signed_by: None,
        };
        assert!(sig.is_complete());
        sig.public_key.clear();
        assert!(!sig.is_complete());
    }
}
