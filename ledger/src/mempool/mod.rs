//! # Mempool
//!
//! Priority-ordered admission queue of verified transactions, one pool
//! per register. Transactions sit here between validation and docket
//! inclusion; the docket builder drains them High → Normal → Low, FIFO
//! within each bucket.
//!
//! ## Capacity policy
//!
//! The pool never blocks and never grows past `max_size`. When full, a
//! new admission evicts the oldest Low-priority transaction; if the Low
//! bucket is empty, the oldest Normal; if that is empty too, the oldest
//! High. A High-priority admission that would push the High bucket past
//! `max_size · high_priority_quota` is re-tagged Normal before insertion,
//! so priority inflation cannot starve the Normal lane.
//!
//! ## Concurrency
//!
//! One mutex per register. Cross-register operations never contend;
//! within a register every mutation is serialized, which is what keeps
//! the bucket-count invariant and FIFO ordering exact.

pub mod verified_queue;

pub use verified_queue::{VerifiedQueue, VerifiedQueueConfig, VerifiedQueueStats};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{Priority, Transaction};

// ---------------------------------------------------------------------------
// Configuration & stats
// ---------------------------------------------------------------------------

/// Mempool tuning parameters.
#[derive(Debug, Clone)]
pub struct MemPoolConfig {
    /// Maximum transactions per register.
    pub max_size: usize,
    /// Fraction of `max_size` the High bucket may hold.
    pub high_priority_quota: f64,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            max_size: crate::config::MEMPOOL_MAX_SIZE,
            high_priority_quota: crate::config::HIGH_PRIORITY_QUOTA,
        }
    }
}

/// Point-in-time statistics for one register's pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemPoolStats {
    pub register_id: String,
    pub total: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    /// Admission time of the oldest pending transaction.
    pub oldest_tx_time: Option<DateTime<Utc>>,
    /// Evictions since the pool was created (all registers).
    pub total_evicted: u64,
    /// Expiry sweeps since the pool was created (all registers).
    pub total_expired: u64,
}

// ---------------------------------------------------------------------------
// Per-register pool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegisterPool {
    transactions: HashMap<String, Transaction>,
    /// tx_ids in admission order per bucket. Kept exactly in sync with
    /// `transactions`: every id appears in exactly one bucket.
    high: VecDeque<String>,
    normal: VecDeque<String>,
    low: VecDeque<String>,
}

impl RegisterPool {
    fn bucket_mut(&mut self, priority: Priority) -> &mut VecDeque<String> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Remove one transaction and its queue entry.
    fn remove_tx(&mut self, tx_id: &str) -> Option<Transaction> {
        let tx = self.transactions.remove(tx_id)?;
        self.bucket_mut(tx.priority).retain(|id| id != tx_id);
        Some(tx)
    }

    /// Evict the oldest transaction, preferring Low, then Normal, then
    /// High. Returns the evicted id.
    fn evict_one(&mut self) -> Option<String> {
        for priority in [Priority::Low, Priority::Normal, Priority::High] {
            if let Some(tx_id) = self.bucket_mut(priority).pop_front() {
                self.transactions.remove(&tx_id);
                return Some(tx_id);
            }
        }
        None
    }

    fn count_of(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high.len(),
            Priority::Normal => self.normal.len(),
            Priority::Low => self.low.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// MemPool
// ---------------------------------------------------------------------------

/// The multi-register transaction pool.
pub struct MemPool {
    pools: DashMap<String, Mutex<RegisterPool>>,
    config: MemPoolConfig,
    total_evicted: AtomicU64,
    total_expired: AtomicU64,
}

impl MemPool {
    pub fn new(config: MemPoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
            total_evicted: AtomicU64::new(0),
            total_expired: AtomicU64::new(0),
        }
    }

    /// Admit a transaction. Returns `false` when the `tx_id` is already
    /// present; capacity pressure is resolved by eviction, never by
    /// refusal.
    pub fn add(&self, register_id: &str, mut tx: Transaction) -> bool {
        let entry = self
            .pools
            .entry(register_id.to_string())
            .or_insert_with(|| Mutex::new(RegisterPool::default()));
        let mut pool = entry.lock();

        if pool.transactions.contains_key(&tx.tx_id) {
            debug!(register = register_id, tx = %tx.tx_id, "duplicate transaction refused");
            return false;
        }

        // High-priority quota: admissions beyond the quota demote to
        // Normal rather than evicting Normal traffic.
        if tx.priority == Priority::High {
            let quota = (self.config.max_size as f64 * self.config.high_priority_quota).ceil()
                as usize;
            if pool.count_of(Priority::High) + 1 > quota {
                debug!(register = register_id, tx = %tx.tx_id, "high-priority quota reached, demoting to Normal");
                tx.priority = Priority::Normal;
            }
        }

        if pool.len() >= self.config.max_size {
            if let Some(evicted) = pool.evict_one() {
                self.total_evicted.fetch_add(1, Ordering::Relaxed);
                warn!(register = register_id, evicted = %evicted, "mempool full, evicted oldest transaction");
            }
        }

        tx.added_at = Some(Utc::now());
        let priority = tx.priority;
        let tx_id = tx.tx_id.clone();
        pool.transactions.insert(tx_id.clone(), tx);
        pool.bucket_mut(priority).push_back(tx_id);
        true
    }

    /// Remove one transaction. Returns whether it was present.
    pub fn remove(&self, register_id: &str, tx_id: &str) -> bool {
        let Some(entry) = self.pools.get(register_id) else {
            return false;
        };
        let mut pool = entry.lock();
        pool.remove_tx(tx_id).is_some()
    }

    /// Remove a batch of transactions (the confirmed-docket drain path).
    /// Returns how many were present.
    pub fn remove_batch(&self, register_id: &str, tx_ids: &[String]) -> usize {
        let Some(entry) = self.pools.get(register_id) else {
            return 0;
        };
        let mut pool = entry.lock();
        tx_ids
            .iter()
            .filter(|id| pool.remove_tx(id).is_some())
            .count()
    }

    /// Pending transactions in drain order: High → Normal → Low, FIFO by
    /// admission time within each bucket, truncated to `max_count`.
    pub fn pending(&self, register_id: &str, max_count: usize) -> Vec<Transaction> {
        let Some(entry) = self.pools.get(register_id) else {
            return Vec::new();
        };
        let pool = entry.lock();

        let mut selected = Vec::with_capacity(max_count.min(pool.len()));
        for bucket in [&pool.high, &pool.normal, &pool.low] {
            for tx_id in bucket {
                if selected.len() == max_count {
                    return selected;
                }
                if let Some(tx) = pool.transactions.get(tx_id) {
                    selected.push(tx.clone());
                }
            }
        }
        selected
    }

    /// Re-admit transactions after a failed consensus round.
    ///
    /// Priorities are preserved and `added_at` is refreshed (returned
    /// transactions join the back of their bucket). Retry counters are
    /// not touched here — that is the failure handler's ledger. Returns
    /// how many were re-admitted (duplicates are skipped, keeping the
    /// operation idempotent).
    pub fn return_transactions(&self, register_id: &str, txs: Vec<Transaction>) -> usize {
        let mut returned = 0;
        for tx in txs {
            if self.add(register_id, tx) {
                returned += 1;
            }
        }
        debug!(register = register_id, returned, "transactions returned to mempool");
        returned
    }

    /// Whether a transaction is currently pending.
    pub fn contains(&self, register_id: &str, tx_id: &str) -> bool {
        self.pools
            .get(register_id)
            .map(|entry| entry.lock().transactions.contains_key(tx_id))
            .unwrap_or(false)
    }

    /// Pending count for one register.
    pub fn count(&self, register_id: &str) -> usize {
        self.pools
            .get(register_id)
            .map(|entry| entry.lock().len())
            .unwrap_or(0)
    }

    /// Sweep expired transactions across every register. Returns the
    /// number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for entry in self.pools.iter() {
            let mut pool = entry.lock();
            let expired: Vec<String> = pool
                .transactions
                .values()
                .filter(|tx| tx.is_expired(now))
                .map(|tx| tx.tx_id.clone())
                .collect();
            for tx_id in expired {
                pool.remove_tx(&tx_id);
                removed += 1;
            }
        }
        if removed > 0 {
            self.total_expired.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "expired transactions swept from mempool");
        }
        removed
    }

    /// Statistics snapshot for one register.
    pub fn stats(&self, register_id: &str) -> MemPoolStats {
        let (total, high, normal, low, oldest) = self
            .pools
            .get(register_id)
            .map(|entry| {
                let pool = entry.lock();
                let oldest = pool.transactions.values().filter_map(|tx| tx.added_at).min();
                (
                    pool.len(),
                    pool.count_of(Priority::High),
                    pool.count_of(Priority::Normal),
                    pool.count_of(Priority::Low),
                    oldest,
                )
            })
            .unwrap_or((0, 0, 0, 0, None));

        MemPoolStats {
            register_id: register_id.to_string(),
            total,
            high,
            normal,
            low,
            oldest_tx_time: oldest,
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new(MemPoolConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Signature;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn tx(id: &str, priority: Priority) -> Transaction {
        let payload = json!({"n": id});
        Transaction {
            tx_id: id.to_string(),
            register_id: "reg-1".to_string(),
            blueprint_id: "bp-1".to_string(),
            action_id: "1".to_string(),
            payload_hash: crate::crypto::payload_hash_hex(&payload),
            payload,
            previous_tx_id: None,
            created_at: Utc::now(),
            expires_at: None,
            priority,
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

    fn small_pool(max_size: usize) -> MemPool {
        MemPool::new(MemPoolConfig {
            max_size,
            high_priority_quota: 0.5,
        })
    }

    // -- Admission ----------------------------------------------------------

    #[test]
    fn add_sets_added_at_and_counts() {
        let pool = MemPool::default();
        assert!(pool.add("reg-1", tx("a", Priority::Normal)));
        assert_eq!(pool.count("reg-1"), 1);
        let pending = pool.pending("reg-1", 10);
        assert!(pending[0].added_at.is_some());
    }

    #[test]
    fn duplicate_tx_id_refused() {
        let pool = MemPool::default();
        assert!(pool.add("reg-1", tx("a", Priority::Normal)));
        assert!(!pool.add("reg-1", tx("a", Priority::High)));
        assert_eq!(pool.count("reg-1"), 1);
    }

    #[test]
    fn same_tx_id_in_different_registers_is_fine() {
        let pool = MemPool::default();
        assert!(pool.add("reg-1", tx("a", Priority::Normal)));
        assert!(pool.add("reg-2", tx("a", Priority::Normal)));
        assert_eq!(pool.count("reg-1"), 1);
        assert_eq!(pool.count("reg-2"), 1);
    }

    // -- Ordering -----------------------------------------------------------

    #[test]
    fn pending_orders_high_normal_low_fifo() {
        let pool = MemPool::default();
        pool.add("reg-1", tx("n1", Priority::Normal));
        pool.add("reg-1", tx("h1", Priority::High));
        pool.add("reg-1", tx("l1", Priority::Low));
        pool.add("reg-1", tx("h2", Priority::High));
        pool.add("reg-1", tx("n2", Priority::Normal));

        let ids: Vec<String> = pool
            .pending("reg-1", 10)
            .into_iter()
            .map(|t| t.tx_id)
            .collect();
        assert_eq!(ids, vec!["h1", "h2", "n1", "n2", "l1"]);
    }

    #[test]
    fn pending_truncates_to_max_count() {
        let pool = MemPool::default();
        for i in 0..10 {
            pool.add("reg-1", tx(&format!("t{i}"), Priority::Normal));
        }
        assert_eq!(pool.pending("reg-1", 3).len(), 3);
    }

    // -- Eviction -----------------------------------------------------------

    #[test]
    fn eviction_prefers_oldest_low() {
        let pool = small_pool(3);
        pool.add("reg-1", tx("l1", Priority::Low));
        pool.add("reg-1", tx("n1", Priority::Normal));
        pool.add("reg-1", tx("l2", Priority::Low));
        // Pool is full; the next add evicts l1 (oldest Low).
        pool.add("reg-1", tx("n2", Priority::Normal));

        assert_eq!(pool.count("reg-1"), 3);
        assert!(!pool.contains("reg-1", "l1"));
        assert!(pool.contains("reg-1", "l2"));
        assert_eq!(pool.stats("reg-1").total_evicted, 1);
    }

    #[test]
    fn eviction_falls_back_to_normal_then_high() {
        let pool = MemPool::new(MemPoolConfig {
            max_size: 2,
            high_priority_quota: 1.0,
        });
        pool.add("reg-1", tx("n1", Priority::Normal));
        pool.add("reg-1", tx("h1", Priority::High));

        // No Low bucket: the oldest Normal goes first.
        pool.add("reg-1", tx("n2", Priority::Normal));
        assert!(!pool.contains("reg-1", "n1"));
        assert!(pool.contains("reg-1", "h1"));

        pool.add("reg-1", tx("h2", Priority::High));
        assert!(!pool.contains("reg-1", "n2"));

        // Only High remains; the oldest High is the last resort.
        pool.add("reg-1", tx("h3", Priority::High));
        assert!(!pool.contains("reg-1", "h1"));
        assert!(pool.contains("reg-1", "h2"));
        assert!(pool.contains("reg-1", "h3"));
        assert_eq!(pool.count("reg-1"), 2);
    }

    // -- High-priority quota -------------------------------------------------

    #[test]
    fn high_priority_quota_downgrades_to_normal() {
        // max_size 4, quota 0.5 → at most 2 High.
        let pool = small_pool(4);
        pool.add("reg-1", tx("h1", Priority::High));
        pool.add("reg-1", tx("h2", Priority::High));
        pool.add("reg-1", tx("h3", Priority::High));

        let stats = pool.stats("reg-1");
        assert_eq!(stats.high, 2);
        assert_eq!(stats.normal, 1);

        // The demoted transaction drains with the Normal bucket.
        let ids: Vec<String> = pool
            .pending("reg-1", 10)
            .into_iter()
            .map(|t| t.tx_id)
            .collect();
        assert_eq!(ids, vec!["h1", "h2", "h3"]);
    }

    // -- Return path ---------------------------------------------------------

    #[test]
    fn return_preserves_priority_and_skips_duplicates() {
        let pool = MemPool::default();
        let high = tx("h1", Priority::High);
        let low = tx("l1", Priority::Low);
        pool.add("reg-1", high.clone());
        pool.add("reg-1", low.clone());

        let drained = pool.pending("reg-1", 10);
        pool.remove_batch(
            "reg-1",
            &drained.iter().map(|t| t.tx_id.clone()).collect::<Vec<_>>(),
        );
        assert_eq!(pool.count("reg-1"), 0);

        // Return both, plus a duplicate of one.
        let returned = pool.return_transactions(
            "reg-1",
            vec![drained[0].clone(), drained[1].clone(), drained[0].clone()],
        );
        assert_eq!(returned, 2);
        let stats = pool.stats("reg-1");
        assert_eq!(stats.high, 1);
        assert_eq!(stats.low, 1);
    }

    #[test]
    fn return_refreshes_added_at() {
        let pool = MemPool::default();
        pool.add("reg-1", tx("a", Priority::Normal));
        let first = pool.pending("reg-1", 1)[0].clone();
        let first_added = first.added_at.unwrap();

        pool.remove("reg-1", "a");
        std::thread::sleep(std::time::Duration::from_millis(5));
        pool.return_transactions("reg-1", vec![first]);

        let second_added = pool.pending("reg-1", 1)[0].added_at.unwrap();
        assert!(second_added > first_added);
    }

    // -- Expiry --------------------------------------------------------------

    #[test]
    fn cleanup_removes_only_expired() {
        let pool = MemPool::default();
        let mut expired = tx("old", Priority::Normal);
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let mut fresh = tx("fresh", Priority::Normal);
        fresh.expires_at = Some(Utc::now() + chrono::Duration::hours(1));

        pool.add("reg-1", expired);
        pool.add("reg-1", fresh);

        assert_eq!(pool.cleanup_expired(), 1);
        assert!(!pool.contains("reg-1", "old"));
        assert!(pool.contains("reg-1", "fresh"));
        assert_eq!(pool.stats("reg-1").total_expired, 1);
    }

    // -- Invariants ----------------------------------------------------------

    #[test]
    fn bucket_counts_sum_to_total() {
        let pool = MemPool::default();
        for i in 0..5 {
            pool.add("reg-1", tx(&format!("h{i}"), Priority::High));
            pool.add("reg-1", tx(&format!("n{i}"), Priority::Normal));
            pool.add("reg-1", tx(&format!("l{i}"), Priority::Low));
        }
        let stats = pool.stats("reg-1");
        assert_eq!(stats.high + stats.normal + stats.low, stats.total);
    }

    #[test]
    fn concurrent_adds_keep_no_duplicates() {
        use std::sync::Arc;
        let pool = Arc::new(MemPool::default());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    pool.add("reg-1", tx(&format!("t{i}"), Priority::Normal));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.count("reg-1"), 100);
    }
}
