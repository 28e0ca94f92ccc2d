//! # Hashing & Merkle Commitments
//!
//! SHA-256 everywhere. Dockets commit to their transactions through a
//! binary Merkle tree; the tree shape is fixed by consensus and cannot
//! change without a coordinated upgrade:
//!
//! - leaf   = `sha256(tx_hash_bytes)`
//! - node   = `sha256(left || right)`
//! - an odd trailing node is paired with itself
//! - the empty tree is the all-zero sentinel (an empty docket still has
//!   a well-defined, recomputable root)

use sha2::{Digest, Sha256};

/// Merkle root of a docket with no transactions.
pub const EMPTY_MERKLE_ROOT: [u8; 32] = [0u8; 32];

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Hash multiple byte slices together without concatenation overhead.
///
/// Feeding parts sequentially into the hasher produces the same digest as
/// hashing their concatenation, minus the temporary buffer.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Compute a binary Merkle root over a list of transaction hashes.
///
/// Each input is a transaction commitment hash (see
/// [`crate::model::Transaction::commitment_hash`]); the leaf is the
/// SHA-256 of those bytes, so a raw transaction hash can never collide
/// with an internal node. An odd element at any level is paired with
/// itself — duplicate transaction hashes are excluded upstream by the
/// mempool's uniqueness invariant, so the classic duplicated-leaf
/// ambiguity cannot produce two valid dockets with the same root.
pub fn merkle_root(tx_hashes: &[[u8; 32]]) -> [u8; 32] {
    if tx_hashes.is_empty() {
        return EMPTY_MERKLE_ROOT;
    }

    let mut level: Vec<[u8; 32]> = tx_hashes.iter().map(|h| sha256(h)).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let left = &chunk[0];
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            next.push(sha256_concat(&[left.as_slice(), right.as_slice()]));
        }
        level = next;
    }

    level[0]
}

/// Merkle root as a lowercase hex string, the form stored on a docket.
pub fn merkle_root_hex(tx_hashes: &[[u8; 32]]) -> String {
    hex::encode(merkle_root(tx_hashes))
}
