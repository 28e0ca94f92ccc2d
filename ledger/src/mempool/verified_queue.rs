//! # Verified Queue
//!
//! A bounded, multi-register holding pen between validation and the
//! mempool. The receiver validates transactions at network speed; the
//! per-register admission path drains at its own pace. This queue absorbs
//! the difference and applies backpressure when it cannot: a full queue
//! refuses the enqueue and the submission fails upstream, rather than the
//! validator growing without bound.
//!
//! Priority is an integer (higher drains first); ties break FIFO by
//! enqueue sequence. Entries carry a TTL and are dropped lazily at
//! dequeue/peek time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Transaction;

// ---------------------------------------------------------------------------
// Configuration & stats
// ---------------------------------------------------------------------------

/// Capacity limits for the queue.
#[derive(Debug, Clone)]
pub struct VerifiedQueueConfig {
    /// Total entries across all registers.
    pub max_total: usize,
    /// Entries per register.
    pub max_per_register: usize,
    /// Distinct registers the queue will track.
    pub max_registers: usize,
    /// Per-entry time to live.
    pub entry_ttl: Duration,
}

impl Default for VerifiedQueueConfig {
    fn default() -> Self {
        Self {
            max_total: 50_000,
            max_per_register: 10_000,
            max_registers: 64,
            entry_ttl: Duration::from_secs(300),
        }
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedQueueStats {
    pub total: usize,
    pub registers: usize,
    pub per_register: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

struct Entry {
    transaction: Transaction,
    priority: i32,
    enqueued_at: DateTime<Utc>,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (older)
        // first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, BinaryHeap<Entry>>,
    total: usize,
    next_seq: u64,
}

// ---------------------------------------------------------------------------
// VerifiedQueue
// ---------------------------------------------------------------------------

/// The global verified-transaction buffer.
pub struct VerifiedQueue {
    inner: Mutex<Inner>,
    config: VerifiedQueueConfig,
}

impl VerifiedQueue {
    pub fn new(config: VerifiedQueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Enqueue a verified transaction. Returns `false` when any capacity
    /// limit would be exceeded — the caller surfaces this as a "full"
    /// rejection.
    pub fn enqueue(&self, register_id: &str, transaction: Transaction, priority: i32) -> bool {
        let mut inner = self.inner.lock();

        if inner.total >= self.config.max_total {
            debug!(register = register_id, "verified queue full (global)");
            return false;
        }
        if !inner.queues.contains_key(register_id) && inner.queues.len() >= self.config.max_registers
        {
            debug!(register = register_id, "verified queue full (register slots)");
            return false;
        }
        if inner
            .queues
            .get(register_id)
            .map(|q| q.len() >= self.config.max_per_register)
            .unwrap_or(false)
        {
            debug!(register = register_id, "verified queue full (per-register)");
            return false;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .queues
            .entry(register_id.to_string())
            .or_default()
            .push(Entry {
                transaction,
                priority,
                enqueued_at: Utc::now(),
                seq,
            });
        inner.total += 1;
        true
    }

    /// Remove and return up to `n` transactions in priority order.
    /// Expired entries encountered along the way are discarded.
    pub fn dequeue(&self, register_id: &str, n: usize) -> Vec<Transaction> {
        let mut inner = self.inner.lock();
        let ttl = chrono::Duration::from_std(self.config.entry_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = Utc::now();

        let Some(queue) = inner.queues.get_mut(register_id) else {
            return Vec::new();
        };

        let mut drained = Vec::with_capacity(n);
        let mut removed = 0;
        while drained.len() < n {
            let Some(entry) = queue.pop() else { break };
            removed += 1;
            if now - entry.enqueued_at > ttl {
                continue;
            }
            drained.push(entry.transaction);
        }
        if queue.is_empty() {
            inner.queues.remove(register_id);
        }
        inner.total -= removed;
        drained
    }

    /// The transaction that `dequeue` would return next, without removing
    /// it. Skips (and discards) expired entries.
    pub fn peek(&self, register_id: &str) -> Option<Transaction> {
        let mut inner = self.inner.lock();
        let ttl = chrono::Duration::from_std(self.config.entry_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = Utc::now();

        let queue = inner.queues.get_mut(register_id)?;
        let mut dropped = 0;
        let result = loop {
            match queue.peek() {
                Some(entry) if now - entry.enqueued_at > ttl => {
                    queue.pop();
                    dropped += 1;
                }
                Some(entry) => break Some(entry.transaction.clone()),
                None => break None,
            }
        };
        if queue.is_empty() {
            inner.queues.remove(register_id);
        }
        inner.total -= dropped;
        result
    }

    /// Re-enqueue a transaction that could not be admitted downstream.
    pub fn return_to_queue(&self, register_id: &str, transaction: Transaction, priority: i32) -> bool {
        self.enqueue(register_id, transaction, priority)
    }

    /// Whether a transaction is currently queued for a register.
    pub fn contains(&self, register_id: &str, tx_id: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .queues
            .get(register_id)
            .map(|q| q.iter().any(|e| e.transaction.tx_id == tx_id))
            .unwrap_or(false)
    }

    /// Drop all entries for one register. Returns how many were dropped.
    pub fn clear(&self, register_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner
            .queues
            .remove(register_id)
            .map(|q| q.len())
            .unwrap_or(0);
        inner.total -= removed;
        removed
    }

    /// Drop everything.
    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.total;
        inner.queues.clear();
        inner.total = 0;
        removed
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> VerifiedQueueStats {
        let inner = self.inner.lock();
        VerifiedQueueStats {
            total: inner.total,
            registers: inner.queues.len(),
            per_register: inner
                .queues
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        }
    }
}

impl Default for VerifiedQueue {
    fn default() -> Self {
        Self::new(VerifiedQueueConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
