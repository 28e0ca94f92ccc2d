//! Leader election with heartbeat failover.
//!
//! Leadership rotates deterministically: the leader for term `t` is the
//! active validator at position `t mod n` in rotation-slot order. There
//! is no voting on leadership — every node computes the same answer from
//! the same registry snapshot — which makes the term number the only
//! coordination primitive. Terms only ever increase: locally through
//! `trigger_election`, or by adopting a higher term observed in a
//! heartbeat.
//!
//! Failover is heartbeat-driven. The current leader broadcasts
//! heartbeats; followers track the last one received and call an
//! election after enough consecutive liveness checks find silence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::events::{EventBus, LedgerEvent};
use crate::registry::{RegistryError, ValidatorRegistry};
use crate::services::PeerService;

/// Failover tuning.
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// Silence longer than this marks a liveness check as missed.
    pub leader_timeout: Duration,
    /// Consecutive missed checks before an election is forced.
    pub missed_heartbeats_threshold: u32,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            leader_timeout: crate::config::LEADER_TIMEOUT,
            missed_heartbeats_threshold: crate::config::MISSED_HEARTBEATS_THRESHOLD,
        }
    }
}

#[derive(Debug, Default)]
struct LeaderState {
    current_leader: Option<String>,
    term: u64,
    last_heartbeat: Option<Instant>,
    missed_checks: u32,
}

/// Per-register leader election state machine.
pub struct LeaderElection {
    register_id: String,
    self_id: String,
    registry: Arc<ValidatorRegistry>,
    peers: Arc<dyn PeerService>,
    events: EventBus,
    config: LeaderElectionConfig,
    state: Mutex<LeaderState>,
}

impl LeaderElection {
    pub fn new(
        register_id: impl Into<String>,
        self_id: impl Into<String>,
        registry: Arc<ValidatorRegistry>,
        peers: Arc<dyn PeerService>,
        events: EventBus,
        config: LeaderElectionConfig,
    ) -> Self {
        Self {
            register_id: register_id.into(),
            self_id: self_id.into(),
            registry,
            peers,
            events,
            config,
            state: Mutex::new(LeaderState::default()),
        }
    }

    pub fn current_term(&self) -> u64 {
        self.state.lock().term
    }

    pub fn current_leader(&self) -> Option<String> {
        self.state.lock().current_leader.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().current_leader.as_deref() == Some(self.self_id.as_str())
    }

    /// Advance the term and install the leader it maps to.
    ///
    /// With no active validators the term still advances and leadership
    /// is vacant — a later election with a populated registry resumes
    /// rotation.
    pub fn trigger_election(&self) -> Result<Option<String>, RegistryError> {
        let order = self.registry.active_ordered(&self.register_id)?;

        let mut state = self.state.lock();
        state.term += 1;
        state.missed_checks = 0;
        state.last_heartbeat = None;

        state.current_leader = if order.is_empty() {
            None
        } else {
            let index = (state.term as usize) % order.len();
            Some(order[index].validator_id.clone())
        };

        info!(register = %self.register_id, term = state.term,
            leader = state.current_leader.as_deref().unwrap_or("<none>"),
            "leader election concluded");
        self.events.emit(LedgerEvent::LeaderChanged {
            register_id: self.register_id.clone(),
            term: state.term,
            leader_id: state.current_leader.clone(),
        });
        Ok(state.current_leader.clone())
    }

    /// The leader a given term maps to under the current registry
    /// snapshot. Pure — does not advance anything.
    pub fn leader_for_term(&self, term: u64) -> Result<Option<String>, RegistryError> {
        let order = self.registry.active_ordered(&self.register_id)?;
        if order.is_empty() {
            return Ok(None);
        }
        let index = (term as usize) % order.len();
        Ok(Some(order[index].validator_id.clone()))
    }

    /// Process an incoming heartbeat.
    ///
    /// A higher term installs its sender as leader immediately — the
    /// sender has seen an election we missed. An equal term from the
    /// current leader refreshes liveness. A stale term is ignored.
    pub fn process_heartbeat(&self, sender_id: &str, sender_term: u64, load: f64) {
        let mut state = self.state.lock();

        if sender_term > state.term {
            info!(register = %self.register_id, term = sender_term, leader = sender_id,
                "adopting higher term from heartbeat");
            state.term = sender_term;
            state.current_leader = Some(sender_id.to_string());
            state.last_heartbeat = Some(Instant::now());
            state.missed_checks = 0;
            self.events.emit(LedgerEvent::HigherTermReceived {
                register_id: self.register_id.clone(),
                term: sender_term,
                leader_id: sender_id.to_string(),
            });
        } else if sender_term == state.term
            && state.current_leader.as_deref() == Some(sender_id)
        {
            debug!(register = %self.register_id, leader = sender_id, load,
                "leader heartbeat received");
            state.last_heartbeat = Some(Instant::now());
            state.missed_checks = 0;
        } else {
            debug!(register = %self.register_id, sender = sender_id, sender_term,
                our_term = state.term, "stale or non-leader heartbeat ignored");
        }
    }

    /// The validator holding the next rotation slot after `current`,
    /// wrapping to the first. An unknown `current` yields the first.
    pub fn get_next_leader(&self, current: &str) -> Result<Option<String>, RegistryError> {
        let order = self.registry.active_ordered(&self.register_id)?;
        if order.is_empty() {
            return Ok(None);
        }
        let position = order.iter().position(|v| v.validator_id == current);
        let next = match position {
            Some(i) => (i + 1) % order.len(),
            None => 0,
        };
        Ok(Some(order[next].validator_id.clone()))
    }

    /// Leader-side heartbeat fan-out. No-op when this node is not the
    /// leader.
    pub async fn send_heartbeat(&self, load: f64) {
        let (term, is_leader) = {
            let state = self.state.lock();
            (
                state.term,
                state.current_leader.as_deref() == Some(self.self_id.as_str()),
            )
        };
        if !is_leader {
            return;
        }

        let validators = match self.registry.active_ordered(&self.register_id) {
            Ok(validators) => validators,
            Err(e) => {
                warn!(register = %self.register_id, error = %e,
                    "heartbeat fan-out skipped: registry unavailable");
                return;
            }
        };

        for validator in validators
            .iter()
            .filter(|v| v.validator_id != self.self_id)
        {
            if let Err(e) = self
                .peers
                .send_heartbeat(validator, &self.self_id, term, load)
                .await
            {
                debug!(register = %self.register_id, peer = %validator.validator_id,
                    error = %e, "heartbeat delivery failed");
            }
        }
    }

    /// Follower-side liveness check, called on a background tick.
    ///
    /// Returns `true` when the check forced an election. The node's own
    /// leadership never times out, and a term that has never seen a
    /// heartbeat counts missed checks from the election itself.
    pub fn check_leader_liveness(&self) -> Result<bool, RegistryError> {
        {
            let mut state = self.state.lock();
            if state.current_leader.is_none()
                || state.current_leader.as_deref() == Some(self.self_id.as_str())
            {
                return Ok(false);
            }

            let silent = match state.last_heartbeat {
                Some(at) => at.elapsed() >= self.config.leader_timeout,
                None => true,
            };
            if !silent {
                return Ok(false);
            }

            state.missed_checks += 1;
            if state.missed_checks < self.config.missed_heartbeats_threshold {
                debug!(register = %self.register_id, missed = state.missed_checks,
                    "leader silent, counting missed checks");
                return Ok(false);
            }
            warn!(register = %self.register_id,
                leader = state.current_leader.as_deref().unwrap_or("<none>"),
                "leader timed out, forcing election");
        }

        self.trigger_election()?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
