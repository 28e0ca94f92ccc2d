//! Register-storage service client contract.
//!
//! Register storage is the shared, durable home of confirmed dockets. The
//! core only ever reads from it during validation and building; writes
//! happen on the consensus output path via [`RegisterStore::append_docket`].

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::ServiceError;
use crate::model::{Docket, Transaction};

/// Read/append access to a register's docket chain.
///
/// `register_height` returns the number of confirmed dockets: 0 means the
/// register is empty (needs genesis), a negative value means the height
/// could not be determined (treated as unknown, not as empty).
#[async_trait]
pub trait RegisterStore: Send + Sync {
    /// Fetch the docket at a given chain position.
    async fn read_docket(
        &self,
        register_id: &str,
        number: u64,
    ) -> Result<Option<Docket>, ServiceError>;

    /// Fetch the docket at the chain tip.
    async fn read_latest_docket(&self, register_id: &str) -> Result<Option<Docket>, ServiceError>;

    /// Number of confirmed dockets; 0 = empty, negative = unknown.
    async fn register_height(&self, register_id: &str) -> Result<i64, ServiceError>;

    /// Look up a committed transaction by ID.
    async fn get_transaction(
        &self,
        register_id: &str,
        tx_id: &str,
    ) -> Result<Option<Transaction>, ServiceError>;

    /// Committed transactions whose `previous_tx_id` equals `prev_tx_id`.
    /// Used by fork detection: more than zero successors means the slot
    /// is taken.
    async fn successors_by_prev(
        &self,
        register_id: &str,
        prev_tx_id: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<Transaction>, ServiceError>;

    /// Page through all committed transactions, oldest first.
    async fn get_transactions(
        &self,
        register_id: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<Transaction>, ServiceError>;

    /// Append a confirmed docket at the chain tip.
    async fn append_docket(&self, docket: &Docket) -> Result<(), ServiceError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Chain {
    dockets: Vec<Docket>,
    transactions: HashMap<String, Transaction>,
}

/// In-memory register storage for dev mode and tests.
#[derive(Default)]
pub struct InMemoryRegisterStore {
    chains: DashMap<String, RwLock<Chain>>,
}

impl InMemoryRegisterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegisterStore for InMemoryRegisterStore {
    async fn read_docket(
        &self,
        register_id: &str,
        number: u64,
    ) -> Result<Option<Docket>, ServiceError> {
        Ok(self
            .chains
            .get(register_id)
            .and_then(|chain| chain.read().dockets.get(number as usize).cloned()))
    }

    async fn read_latest_docket(&self, register_id: &str) -> Result<Option<Docket>, ServiceError> {
        Ok(self
            .chains
            .get(register_id)
            .and_then(|chain| chain.read().dockets.last().cloned()))
    }

    async fn register_height(&self, register_id: &str) -> Result<i64, ServiceError> {
        Ok(self
            .chains
            .get(register_id)
            .map(|chain| chain.read().dockets.len() as i64)
            .unwrap_or(0))
    }

    async fn get_transaction(
        &self,
        register_id: &str,
        tx_id: &str,
    ) -> Result<Option<Transaction>, ServiceError> {
        Ok(self
            .chains
            .get(register_id)
            .and_then(|chain| chain.read().transactions.get(tx_id).cloned()))
    }

    async fn successors_by_prev(
        &self,
        register_id: &str,
        prev_tx_id: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let Some(chain) = self.chains.get(register_id) else {
            return Ok(Vec::new());
        };
        let guard = chain.read();
        let mut successors: Vec<Transaction> = guard
            .transactions
            .values()
            .filter(|tx| tx.previous_tx_id.as_deref() == Some(prev_tx_id))
            .cloned()
            .collect();
        successors.sort_by(|a, b| a.tx_id.cmp(&b.tx_id));
        Ok(successors
            .into_iter()
            .skip(page * size)
            .take(size)
            .collect())
    }

    async fn get_transactions(
        &self,
        register_id: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let Some(chain) = self.chains.get(register_id) else {
            return Ok(Vec::new());
        };
        let guard = chain.read();
        let ordered: Vec<Transaction> = guard
            .dockets
            .iter()
            .flat_map(|d| d.transactions.iter().cloned())
            .collect();
        Ok(ordered.into_iter().skip(page * size).take(size).collect())
    }

    async fn append_docket(&self, docket: &Docket) -> Result<(), ServiceError> {
        let entry = self
            .chains
            .entry(docket.register_id.clone())
            .or_insert_with(|| RwLock::new(Chain::default()));
        let mut chain = entry.write();

        let expected = chain.dockets.len() as u64;
        if docket.docket_number != expected {
            return Err(ServiceError::Failed(format!(
                "docket number {} does not extend chain at height {}",
                docket.docket_number, expected
            )));
        }
        if let Some(tip) = chain.dockets.last() {
            if docket.previous_hash.as_deref() != Some(tip.docket_hash.as_str()) {
                return Err(ServiceError::Failed(
                    "docket does not link to the chain tip".to_string(),
                ));
            }
        }

        for tx in &docket.transactions {
            chain.transactions.insert(tx.tx_id.clone(), tx.clone());
        }
        chain.dockets.push(docket.clone());
        Ok(())
    }
}
