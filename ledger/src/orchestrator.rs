//! # Orchestrator
//!
//! The per-register tick loop that wires the whole pipeline together:
//! expiry sweep → leadership check → build decision → docket assembly →
//! consensus → apply/broadcast or failure handling. Followers do almost
//! nothing here — they react to gossip through the confirmer and answer
//! vote requests through the engine.
//!
//! ## Shutdown
//!
//! The loop watches a `tokio::sync::watch` channel. The same receiver is
//! threaded into the consensus round as its cancellation signal, so a
//! shutdown mid-round stops vote collection instead of waiting it out.
//! No docket is left half-applied: a cancelled round fails cleanly and
//! its transactions stay in the mempool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::consensus::{
    ConsensusEngine, ConsensusFailureHandler, ControlDocketProcessor, DocketBuilder,
    FailureAction, LeaderElection,
};
use crate::mempool::MemPool;
use crate::model::Docket;
use crate::services::{PeerService, RegisterStore};

/// What one tick did for one register.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// This node is not the register's leader.
    NotLeader,
    /// Leader, but no build was due.
    NotDue,
    /// A build was due but produced no docket.
    NothingBuilt,
    /// A docket achieved consensus and was applied.
    Confirmed {
        docket_id: String,
        transactions: usize,
    },
    /// Consensus failed; the failure handler decided what happens next.
    Failed { action: FailureAction },
}

struct RegisterRuntime {
    election: Arc<LeaderElection>,
    last_build: Mutex<Option<Instant>>,
}

/// The validator node's top-level driver.
pub struct Orchestrator {
    mempool: Arc<MemPool>,
    builder: Arc<DocketBuilder>,
    engine: Arc<ConsensusEngine>,
    failure: Arc<ConsensusFailureHandler>,
    control: Arc<ControlDocketProcessor>,
    store: Arc<dyn RegisterStore>,
    peers: Arc<dyn PeerService>,
    registers: DashMap<String, RegisterRuntime>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mempool: Arc<MemPool>,
        builder: Arc<DocketBuilder>,
        engine: Arc<ConsensusEngine>,
        failure: Arc<ConsensusFailureHandler>,
        control: Arc<ControlDocketProcessor>,
        store: Arc<dyn RegisterStore>,
        peers: Arc<dyn PeerService>,
    ) -> Self {
        Self {
            mempool,
            builder,
            engine,
            failure,
            control,
            store,
            peers,
            registers: DashMap::new(),
        }
    }

    /// Start serving a register with its leader-election instance.
    pub fn add_register(&self, register_id: impl Into<String>, election: Arc<LeaderElection>) {
        self.registers.insert(
            register_id.into(),
            RegisterRuntime {
                election,
                last_build: Mutex::new(None),
            },
        );
    }

    pub fn registers(&self) -> Vec<String> {
        self.registers.iter().map(|e| e.key().clone()).collect()
    }

    /// One tick for one register.
    pub async fn tick(&self, register_id: &str, cancel: watch::Receiver<bool>) -> TickOutcome {
        self.mempool.cleanup_expired();

        let Some(runtime) = self.registers.get(register_id) else {
            warn!(register = register_id, "tick for unknown register");
            return TickOutcome::NotLeader;
        };
        let election = Arc::clone(&runtime.election);
        let last_build = *runtime.last_build.lock();
        drop(runtime);

        if !election.is_leader() {
            return TickOutcome::NotLeader;
        }

        if !self.builder.should_build(register_id, last_build) {
            return TickOutcome::NotDue;
        }

        let term = election.current_term();
        let Some(docket) = self.builder.build(register_id, term, false).await else {
            return TickOutcome::NothingBuilt;
        };
        if let Some(runtime) = self.registers.get(register_id) {
            *runtime.last_build.lock() = Some(Instant::now());
        }

        let result = self
            .engine
            .achieve_consensus(docket, cancel.clone())
            .await;

        if result.achieved {
            self.finish_confirmed(register_id, &result.docket).await;
            return TickOutcome::Confirmed {
                docket_id: result.docket.docket_id.clone(),
                transactions: result.docket.transactions.len(),
            };
        }

        let collection = match &result.collection {
            Some(collection) => collection.clone(),
            None => {
                // The round failed before collection started (no
                // validators, config missing); nothing to retry against.
                debug!(register = register_id,
                    reason = result.failure_reason.as_deref().unwrap_or("unknown"),
                    "consensus failed before collection");
                return TickOutcome::Failed {
                    action: FailureAction::NoActionNeeded,
                };
            }
        };

        let outcome = self
            .failure
            .handle_failure(result.docket, &collection, cancel)
            .await;
        if outcome.succeeded && outcome.action == FailureAction::Retry {
            self.finish_confirmed(register_id, &outcome.updated_docket)
                .await;
            return TickOutcome::Confirmed {
                docket_id: outcome.updated_docket.docket_id.clone(),
                transactions: outcome.updated_docket.transactions.len(),
            };
        }

        TickOutcome::Failed {
            action: outcome.action,
        }
    }

    /// The confirmed-docket output path: persist, apply control effects,
    /// drain the mempool, broadcast.
    async fn finish_confirmed(&self, register_id: &str, docket: &Docket) {
        if let Err(e) = self.store.append_docket(docket).await {
            // The cohort confirmed this docket; failing to persist is a
            // local problem that sync will repair. Do not drop the rest
            // of the output path.
            warn!(register = register_id, docket = %docket.docket_id, error = %e,
                "confirmed docket persist failed");
        }

        let control = self.control.apply_committed(register_id, docket);
        if !control.success {
            warn!(register = register_id, docket = %docket.docket_id,
                "control application reported failures");
        }

        let tx_ids: Vec<String> = docket
            .transactions
            .iter()
            .map(|tx| tx.tx_id.clone())
            .collect();
        self.mempool.remove_batch(register_id, &tx_ids);

        match serde_json::to_vec(docket) {
            Ok(bytes) => {
                if let Err(e) = self
                    .peers
                    .broadcast_confirmed_docket(register_id, &docket.docket_id, &bytes)
                    .await
                {
                    warn!(register = register_id, docket = %docket.docket_id, error = %e,
                        "confirmed docket broadcast failed");
                }
            }
            Err(e) => warn!(docket = %docket.docket_id, error = %e, "docket serialize failed"),
        }

        self.engine.pending_store().remove(&docket.docket_id);

        info!(register = register_id, docket = %docket.docket_id,
            number = docket.docket_number, txs = docket.transactions.len(),
            "confirmed docket applied");
    }

    /// Run the orchestrator until shutdown.
    ///
    /// Each iteration sends heartbeats (when leading), checks leader
    /// liveness (when following), bootstraps an election for registers
    /// that have never had one, and runs the tick for every register.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, tick_interval: Duration) {
        info!(registers = self.registers.len(), "orchestrator starting");

        loop {
            if *shutdown.borrow() {
                info!("orchestrator received shutdown signal, exiting");
                return;
            }

            let register_ids = self.registers();
            for register_id in &register_ids {
                let election = match self.registers.get(register_id) {
                    Some(runtime) => Arc::clone(&runtime.election),
                    None => continue,
                };

                if election.current_leader().is_none() {
                    if let Err(e) = election.trigger_election() {
                        warn!(register = %register_id, error = %e, "bootstrap election failed");
                    }
                } else if election.is_leader() {
                    election.send_heartbeat(self.load_factor()).await;
                } else if let Err(e) = election.check_leader_liveness() {
                    warn!(register = %register_id, error = %e, "liveness check failed");
                }

                let outcome = self.tick(register_id, shutdown.clone()).await;
                debug!(register = %register_id, ?outcome, "tick finished");
            }

            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orchestrator shutting down during sleep");
                        return;
                    }
                }
            }
        }
    }

    /// A coarse load signal carried in heartbeats: mempool occupancy
    /// across served registers, normalized per register.
    fn load_factor(&self) -> f64 {
        let registers = self.registers();
        if registers.is_empty() {
            return 0.0;
        }
        let total: usize = registers.iter().map(|r| self.mempool.count(r)).sum();
        total as f64 / (registers.len() as f64 * crate::config::MEMPOOL_MAX_SIZE as f64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
