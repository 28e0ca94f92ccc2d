//! Docket assembly and genesis bootstrap.
//!
//! The builder turns "pending transactions" into "a signed, chain-linked
//! proposed docket". It is deliberately conservative about the chain tip:
//! if the register claims a height but storage cannot produce the latest
//! docket, the builder declines to build rather than fabricate docket 0
//! or a broken link. A skipped tick costs milliseconds; a chain break
//! costs a register.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mempool::MemPool;
use crate::model::{Docket, DocketStatus, Signature, Transaction};
use crate::registry::RegisterConfigStore;
use crate::services::{RegisterStore, WalletClient};

/// Bytes a proposer (and every voter) signs for a docket: the UTF-8 of
/// the hex docket hash.
pub fn docket_signing_bytes(docket_hash: &str) -> &[u8] {
    docket_hash.as_bytes()
}

// ---------------------------------------------------------------------------
// GenesisManager
// ---------------------------------------------------------------------------

/// Decides when a register needs its genesis docket and builds it.
pub struct GenesisManager {
    store: Arc<dyn RegisterStore>,
}

impl GenesisManager {
    pub fn new(store: Arc<dyn RegisterStore>) -> Self {
        Self { store }
    }

    /// Whether a register has no chain yet.
    ///
    /// A negative height is the storage service saying "unknown"; that is
    /// treated as needing genesis (the register was just created and has
    /// never been written). Height 0 needs a confirming latest-docket
    /// probe: a register that reports empty but produces a latest docket
    /// is mid-write on another node, and building genesis on top of it
    /// would fork the chain.
    pub async fn needs_genesis(&self, register_id: &str) -> bool {
        match self.store.register_height(register_id).await {
            Ok(height) if height < 0 => true,
            Ok(0) => match self.store.read_latest_docket(register_id).await {
                Ok(None) => true,
                Ok(Some(_)) => false,
                Err(e) => {
                    warn!(register = register_id, error = %e,
                        "latest-docket probe failed, not building genesis");
                    false
                }
            },
            Ok(_) => false,
            Err(e) => {
                warn!(register = register_id, error = %e,
                    "height probe failed, not building genesis");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DocketBuilder
// ---------------------------------------------------------------------------

/// Assembles proposed dockets for the registers this node leads.
pub struct DocketBuilder {
    store: Arc<dyn RegisterStore>,
    mempool: Arc<MemPool>,
    wallet: Arc<dyn WalletClient>,
    config: Arc<RegisterConfigStore>,
    genesis: GenesisManager,
    self_id: String,
    /// Pre-provisioned system wallet; empty means auto-create on first
    /// build.
    system_wallet_address: String,
}

impl DocketBuilder {
    pub fn new(
        store: Arc<dyn RegisterStore>,
        mempool: Arc<MemPool>,
        wallet: Arc<dyn WalletClient>,
        config: Arc<RegisterConfigStore>,
        self_id: impl Into<String>,
        system_wallet_address: impl Into<String>,
    ) -> Self {
        let genesis = GenesisManager::new(Arc::clone(&store));
        Self {
            store,
            mempool,
            wallet,
            config,
            genesis,
            self_id: self_id.into(),
            system_wallet_address: system_wallet_address.into(),
        }
    }

    pub fn genesis_manager(&self) -> &GenesisManager {
        &self.genesis
    }

    /// Whether this tick should build: enough time has passed since the
    /// last build, or enough transactions are pending. Any error answers
    /// "no" — a skipped tick is always safe.
    pub fn should_build(&self, register_id: &str, last_build: Option<Instant>) -> bool {
        let config = match self.config.get(register_id) {
            Ok(config) => config,
            Err(e) => {
                warn!(register = register_id, error = %e, "config unavailable, skipping build");
                return false;
            }
        };

        let due = match last_build {
            Some(at) => at.elapsed() >= config.docket_build_interval(),
            None => true,
        };
        due || self.mempool.count(register_id) >= config.docket_build_size_threshold
    }

    /// Build a proposed docket at the register's chain tip.
    ///
    /// Returns `None` when there is nothing to build (`allow_empty`
    /// false and no pending transactions) or when the chain tip cannot be
    /// established. Never panics, never propagates to the tick loop.
    pub async fn build(&self, register_id: &str, term: u64, allow_empty: bool) -> Option<Docket> {
        let config = match self.config.get(register_id) {
            Ok(config) => config,
            Err(e) => {
                warn!(register = register_id, error = %e, "config unavailable, not building");
                return None;
            }
        };
        let pending = self
            .mempool
            .pending(register_id, config.max_transactions_per_docket);

        if self.genesis.needs_genesis(register_id).await {
            return self.assemble(register_id, 0, None, pending, term).await;
        }

        if pending.is_empty() && !allow_empty {
            debug!(register = register_id, "no pending transactions, not building");
            return None;
        }

        let latest = match self.store.read_latest_docket(register_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                // Height said non-empty but the tip is gone: storage is
                // inconsistent or mid-write. Decline.
                warn!(register = register_id,
                    "register reports a chain but no latest docket, not building");
                return None;
            }
            Err(e) => {
                warn!(register = register_id, error = %e, "chain tip read failed, not building");
                return None;
            }
        };

        self.assemble(
            register_id,
            latest.docket_number + 1,
            Some(latest.docket_hash),
            pending,
            term,
        )
        .await
    }

    async fn assemble(
        &self,
        register_id: &str,
        docket_number: u64,
        previous_hash: Option<String>,
        transactions: Vec<Transaction>,
        term: u64,
    ) -> Option<Docket> {
        // The mempool is keyed by register, so a mismatch here means a
        // bug upstream; drop the stray rather than poison the docket.
        let transactions: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| {
                let matches = tx.register_id == register_id;
                if !matches {
                    warn!(tx = %tx.tx_id, expected = register_id, actual = %tx.register_id,
                        "transaction with foreign register dropped from docket");
                }
                matches
            })
            .collect();

        let mut docket = Docket {
            docket_id: Uuid::new_v4().to_string(),
            register_id: register_id.to_string(),
            docket_number,
            previous_hash,
            docket_hash: String::new(),
            merkle_root: String::new(),
            created_at: Utc::now(),
            transactions,
            proposer_validator_id: self.self_id.clone(),
            proposer_term: term,
            proposer_signature: None,
            status: DocketStatus::Proposed,
            votes: Vec::new(),
            metadata: BTreeMap::new(),
            consensus_achieved_at: None,
        };
        docket.merkle_root = docket.compute_merkle_root();
        docket.docket_hash = docket.compute_hash();

        let wallet_id = if self.system_wallet_address.is_empty() {
            match self
                .wallet
                .create_or_retrieve_system_wallet(&self.self_id)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(register = register_id, error = %e, "system wallet unavailable");
                    return None;
                }
            }
        } else {
            self.system_wallet_address.clone()
        };

        let signed = match self
            .wallet
            .sign(&wallet_id, docket_signing_bytes(&docket.docket_hash))
            .await
        {
            Ok(signed) => signed,
            Err(e) => {
                warn!(register = register_id, error = %e, "docket signing failed");
                return None;
            }
        };
        docket.proposer_signature = Some(Signature {
            public_key: signed.public_key,
            signature_value: signed.signature,
            algorithm: signed.algorithm,
            signed_at: Utc::now(),
            signed_by: Some(signed.signed_by),
        });

        info!(register = register_id, docket = %docket.docket_id, number = docket_number,
            txs = docket.transactions.len(), genesis = (docket_number == 0), "docket built");
        Some(docket)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
