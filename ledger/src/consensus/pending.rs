//! In-flight docket registry.
//!
//! The pending store is the sole owner of dockets between proposal and
//! resolution. Other components borrow snapshots; nothing mutates an
//! in-flight docket except through this store, which serializes per-entry
//! updates internally.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::model::{ConsensusVote, Docket, DocketStatus};

/// One tracked in-flight docket.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub docket: Docket,
    /// Signatures collected so far, at most one per validator.
    pub signatures: Vec<ConsensusVote>,
    pub first_seen: Instant,
}

/// Occupancy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingStoreStats {
    pub total: usize,
    pub proposed: usize,
    pub confirmed: usize,
    pub rejected: usize,
}

/// Keyed store of dockets currently in consensus.
#[derive(Default)]
pub struct PendingDocketStore {
    entries: DashMap<String, PendingEntry>,
}

impl PendingDocketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a docket. A docket already present is left untouched and
    /// `false` is returned — re-proposals must not clobber collected
    /// signatures.
    pub fn add(&self, docket: Docket) -> bool {
        let mut inserted = false;
        self.entries
            .entry(docket.docket_id.clone())
            .or_insert_with(|| {
                inserted = true;
                PendingEntry {
                    docket,
                    signatures: Vec::new(),
                    first_seen: Instant::now(),
                }
            });
        inserted
    }

    pub fn get(&self, docket_id: &str) -> Option<PendingEntry> {
        self.entries.get(docket_id).map(|e| e.clone())
    }

    pub fn get_by_register(&self, register_id: &str) -> Vec<PendingEntry> {
        self.entries
            .iter()
            .filter(|e| e.docket.register_id == register_id)
            .map(|e| e.clone())
            .collect()
    }

    pub fn get_by_status(&self, status: DocketStatus) -> Vec<PendingEntry> {
        self.entries
            .iter()
            .filter(|e| e.docket.status == status)
            .map(|e| e.clone())
            .collect()
    }

    /// Update the status of a tracked docket. Returns whether it existed.
    pub fn update_status(&self, docket_id: &str, status: DocketStatus) -> bool {
        match self.entries.get_mut(docket_id) {
            Some(mut entry) => {
                entry.docket.status = status;
                true
            }
            None => false,
        }
    }

    /// Attach a collected signature, deduplicated per validator. Returns
    /// `false` for an unknown docket or a duplicate vote.
    pub fn add_signature(&self, docket_id: &str, vote: ConsensusVote) -> bool {
        match self.entries.get_mut(docket_id) {
            Some(mut entry) => {
                if entry
                    .signatures
                    .iter()
                    .any(|v| v.validator_id == vote.validator_id)
                {
                    return false;
                }
                entry.signatures.push(vote);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, docket_id: &str) -> Option<PendingEntry> {
        self.entries.remove(docket_id).map(|(_, entry)| entry)
    }

    pub fn get_count(&self) -> usize {
        self.entries.len()
    }

    /// Entries first seen longer ago than `older_than` — candidates for
    /// failure handling after a node hiccup.
    pub fn get_stale(&self, older_than: Duration) -> Vec<PendingEntry> {
        self.entries
            .iter()
            .filter(|e| e.first_seen.elapsed() > older_than)
            .map(|e| e.clone())
            .collect()
    }

    /// Drop every entry of one register. Returns how many were dropped.
    pub fn clear_register(&self, register_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.docket.register_id != register_id);
        before - self.entries.len()
    }

    pub fn stats(&self) -> PendingStoreStats {
        let mut stats = PendingStoreStats {
            total: 0,
            proposed: 0,
            confirmed: 0,
            rejected: 0,
        };
        for entry in self.entries.iter() {
            stats.total += 1;
            match entry.docket.status {
                DocketStatus::Proposed => stats.proposed += 1,
                DocketStatus::Confirmed => stats.confirmed += 1,
                DocketStatus::Rejected => stats.rejected += 1,
            }
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
