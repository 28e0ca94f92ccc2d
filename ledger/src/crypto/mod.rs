//! # Cryptographic Primitives
//!
//! Hash functions, canonical serialization, and Merkle commitments used
//! throughout Meridian. Everything consensus-visible is SHA-256: payload
//! hashes, transaction commitments, Merkle trees, and docket hashes all
//! share one hash function so that any two validators — or an auditor with
//! a shell and `sha256sum` — can recompute every commitment in the chain.
//!
//! Signature verification does NOT live here. Key material never enters
//! this process; signing and verification go through the wallet service
//! (see [`crate::services::wallet`]).

pub mod b64;
pub mod canonical;
pub mod hash;

pub use canonical::{canonical_json, payload_hash, payload_hash_hex};
pub use hash::{merkle_root, merkle_root_hex, sha256, sha256_concat, EMPTY_MERKLE_ROOT};
