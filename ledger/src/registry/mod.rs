//! # Validator Registry
//!
//! The authoritative per-register set of validators, their statuses, and
//! their rotation order. State lives in the key-value store under
//! `{prefix}:{register}:…` keys with JSON values; an in-process snapshot
//! cache serves reads and is invalidated on every mutation and on
//! explicit `refresh` (the store is externally mutable — committed
//! control dockets on other nodes change it underneath us).
//!
//! `order_index` is assigned from a monotonic per-register counter at
//! registration and never reused, which is what makes leader rotation a
//! stable function of the term number.

pub mod config_store;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::events::{EventBus, LedgerEvent};
use crate::model::{AdminRoster, ValidatorInfo, ValidatorRegistration, ValidatorStatus};
use crate::services::{KeyValueStore, ServiceError};
use crate::validation::rights::RosterProvider;

pub use config_store::RegisterConfigStore;

// ---------------------------------------------------------------------------
// Configuration & errors
// ---------------------------------------------------------------------------

/// How new validators join a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Registration is immediately Active.
    Public,
    /// Registration lands Pending and requires approval.
    Consent,
}

/// Registry policy for all registers served by this node.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Key namespace prefix in the KV store.
    pub prefix: String,
    pub mode: RegistrationMode,
    pub max_validators: usize,
    pub min_validators: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: "validators".to_string(),
            mode: RegistrationMode::Consent,
            max_validators: 64,
            min_validators: 1,
        }
    }
}

/// Registry operation failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validator {0} is already registered")]
    AlreadyRegistered(String),
    #[error("validator {0} not found")]
    NotFound(String),
    #[error("validator {0} is not pending")]
    NotPending(String),
    #[error("register {0} already has the maximum number of active validators")]
    MaxValidatorsReached(String),
    #[error("removal would drop register {0} below its minimum validator count")]
    BelowMinimum(String),
    #[error("operation requires consent registration mode")]
    WrongMode,
    #[error("persisted registry state is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Store(#[from] ServiceError),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The per-register validator registry.
pub struct ValidatorRegistry {
    kv: Arc<dyn KeyValueStore>,
    config: RegistryConfig,
    events: EventBus,
    /// Snapshot cache: register → ordered validator list.
    cache: DashMap<String, Arc<Vec<ValidatorInfo>>>,
    /// Per-register mutation serialization.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ValidatorRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: RegistryConfig, events: EventBus) -> Self {
        Self {
            kv,
            config,
            events,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock_for(&self, register_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(register_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // -- Keys ---------------------------------------------------------------

    fn validator_key(&self, register_id: &str, validator_id: &str) -> String {
        format!("{}:{register_id}:validator:{validator_id}", self.config.prefix)
    }

    fn pending_key(&self, register_id: &str, validator_id: &str) -> String {
        format!("{}:{register_id}:pending:{validator_id}", self.config.prefix)
    }

    fn order_key(&self, register_id: &str) -> String {
        format!("{}:{register_id}:order", self.config.prefix)
    }

    fn roster_key(&self, register_id: &str) -> String {
        format!("{}:{register_id}:roster", self.config.prefix)
    }

    // -- Registration -------------------------------------------------------

    /// Register a validator. In Public mode it becomes Active at once; in
    /// Consent mode it lands Pending. The rotation slot is assigned here
    /// either way.
    pub fn register(
        &self,
        register_id: &str,
        registration: ValidatorRegistration,
    ) -> Result<ValidatorInfo, RegistryError> {
        let lock = self.lock_for(register_id);
        let _guard = lock.lock();

        if self
            .read_validator(register_id, &registration.validator_id)?
            .is_some()
        {
            return Err(RegistryError::AlreadyRegistered(registration.validator_id));
        }

        if self.config.mode == RegistrationMode::Public
            && self.active_count_locked(register_id)? >= self.config.max_validators
        {
            return Err(RegistryError::MaxValidatorsReached(register_id.to_string()));
        }

        let order_index = self.next_order_index(register_id, &registration.validator_id)?;
        let status = match self.config.mode {
            RegistrationMode::Public => ValidatorStatus::Active,
            RegistrationMode::Consent => ValidatorStatus::Pending,
        };

        let info = ValidatorInfo {
            validator_id: registration.validator_id.clone(),
            public_key: registration.public_key,
            rpc_endpoint: registration.rpc_endpoint,
            status,
            registered_at: Utc::now(),
            order_index,
            reputation_score: 1.0,
            metadata: registration.metadata,
        };

        let key = match status {
            ValidatorStatus::Pending => self.pending_key(register_id, &info.validator_id),
            _ => self.validator_key(register_id, &info.validator_id),
        };
        self.write_json(&key, &info)?;

        self.invalidate(register_id);
        self.events.emit(LedgerEvent::ValidatorListChanged {
            register_id: register_id.to_string(),
        });
        info!(register = register_id, validator = %info.validator_id, status = %info.status,
            slot = order_index, "validator registered");
        Ok(info)
    }

    /// Approve a pending validator (Consent mode only).
    pub fn approve_validator(
        &self,
        register_id: &str,
        validator_id: &str,
        approved_by: &str,
    ) -> Result<ValidatorInfo, RegistryError> {
        if self.config.mode != RegistrationMode::Consent {
            return Err(RegistryError::WrongMode);
        }
        let lock = self.lock_for(register_id);
        let _guard = lock.lock();

        let pending_key = self.pending_key(register_id, validator_id);
        let Some(mut info) = self.read_json::<ValidatorInfo>(&pending_key)? else {
            return Err(RegistryError::NotPending(validator_id.to_string()));
        };
        if info.status != ValidatorStatus::Pending {
            return Err(RegistryError::NotPending(validator_id.to_string()));
        }
        if self.active_count_locked(register_id)? >= self.config.max_validators {
            return Err(RegistryError::MaxValidatorsReached(register_id.to_string()));
        }

        info.status = ValidatorStatus::Active;
        info.metadata
            .insert("approved_by".to_string(), approved_by.to_string());
        info.metadata
            .insert("approved_at".to_string(), Utc::now().to_rfc3339());

        self.write_json(&self.validator_key(register_id, validator_id), &info)?;
        self.kv.delete(&pending_key)?;

        self.invalidate(register_id);
        self.events.emit(LedgerEvent::ValidatorApproved {
            register_id: register_id.to_string(),
            validator_id: validator_id.to_string(),
        });
        self.events.emit(LedgerEvent::ValidatorListChanged {
            register_id: register_id.to_string(),
        });
        info!(register = register_id, validator = validator_id, by = approved_by,
            "validator approved");
        Ok(info)
    }

    /// Reject a pending validator: it becomes Removed with an audit trail.
    pub fn reject_validator(
        &self,
        register_id: &str,
        validator_id: &str,
        reason: &str,
        rejected_by: &str,
    ) -> Result<(), RegistryError> {
        let lock = self.lock_for(register_id);
        let _guard = lock.lock();

        let pending_key = self.pending_key(register_id, validator_id);
        let Some(mut info) = self.read_json::<ValidatorInfo>(&pending_key)? else {
            return Err(RegistryError::NotPending(validator_id.to_string()));
        };

        info.status = ValidatorStatus::Removed;
        info.metadata
            .insert("rejection_reason".to_string(), reason.to_string());
        info.metadata
            .insert("rejected_by".to_string(), rejected_by.to_string());

        self.write_json(&self.validator_key(register_id, validator_id), &info)?;
        self.kv.delete(&pending_key)?;

        self.invalidate(register_id);
        self.events.emit(LedgerEvent::ValidatorRejected {
            register_id: register_id.to_string(),
            validator_id: validator_id.to_string(),
            reason: reason.to_string(),
        });
        info!(register = register_id, validator = validator_id, reason, "validator rejected");
        Ok(())
    }

    /// Suspend an active validator.
    pub fn suspend_validator(
        &self,
        register_id: &str,
        validator_id: &str,
    ) -> Result<(), RegistryError> {
        self.transition(register_id, validator_id, ValidatorStatus::Suspended)
    }

    /// Remove a validator, enforcing the register's minimum active count.
    pub fn remove_validator(
        &self,
        register_id: &str,
        validator_id: &str,
    ) -> Result<(), RegistryError> {
        let lock = self.lock_for(register_id);
        let _guard = lock.lock();

        let key = self.validator_key(register_id, validator_id);
        let Some(info) = self.read_json::<ValidatorInfo>(&key)? else {
            return Err(RegistryError::NotFound(validator_id.to_string()));
        };

        if info.status == ValidatorStatus::Active {
            let remaining = self.active_count_locked(register_id)?.saturating_sub(1);
            if remaining < self.config.min_validators {
                return Err(RegistryError::BelowMinimum(register_id.to_string()));
            }
        }

        let mut info = info;
        info.status = ValidatorStatus::Removed;
        self.write_json(&key, &info)?;

        self.invalidate(register_id);
        self.events.emit(LedgerEvent::ValidatorListChanged {
            register_id: register_id.to_string(),
        });
        info!(register = register_id, validator = validator_id, "validator removed");
        Ok(())
    }

    /// Lower a validator's local reputation estimate after observed
    /// non-response. Never fails the caller: reputation is advisory.
    pub fn penalize_reputation(&self, register_id: &str, validator_id: &str, delta: f64) {
        let lock = self.lock_for(register_id);
        let _guard = lock.lock();

        let key = self.validator_key(register_id, validator_id);
        if let Ok(Some(mut info)) = self.read_json::<ValidatorInfo>(&key) {
            info.reputation_score = (info.reputation_score - delta).max(0.0);
            let _ = self.write_json(&key, &info);
            self.invalidate(register_id);
            debug!(register = register_id, validator = validator_id,
                score = info.reputation_score, "reputation adjusted");
        }
    }

    // -- Queries ------------------------------------------------------------

    /// Look up a validator (registered or pending).
    pub fn get(
        &self,
        register_id: &str,
        validator_id: &str,
    ) -> Result<Option<ValidatorInfo>, RegistryError> {
        self.read_validator(register_id, validator_id)
    }

    /// All non-pending validators, ordered by rotation slot.
    pub fn list(&self, register_id: &str) -> Result<Vec<ValidatorInfo>, RegistryError> {
        if let Some(cached) = self.cache.get(register_id) {
            return Ok(cached.as_ref().clone());
        }

        let prefix = format!("{}:{register_id}:validator:", self.config.prefix);
        let mut validators = Vec::new();
        for (_, value) in self.kv.scan_prefix(&prefix)? {
            let info: ValidatorInfo = serde_json::from_slice(&value)
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
            validators.push(info);
        }
        validators.sort_by_key(|v| v.order_index);

        self.cache
            .insert(register_id.to_string(), Arc::new(validators.clone()));
        Ok(validators)
    }

    /// Active validators, ordered by rotation slot.
    pub fn active_ordered(&self, register_id: &str) -> Result<Vec<ValidatorInfo>, RegistryError> {
        Ok(self
            .list(register_id)?
            .into_iter()
            .filter(|v| v.is_active())
            .collect())
    }

    /// Pending registrations.
    pub fn pending(&self, register_id: &str) -> Result<Vec<ValidatorInfo>, RegistryError> {
        let prefix = format!("{}:{register_id}:pending:", self.config.prefix);
        let mut pending = Vec::new();
        for (_, value) in self.kv.scan_prefix(&prefix)? {
            let info: ValidatorInfo = serde_json::from_slice(&value)
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
            pending.push(info);
        }
        pending.sort_by_key(|v| v.order_index);
        Ok(pending)
    }

    /// The registration order: validator IDs by assigned slot, including
    /// pending and removed entries (slots are never reused).
    pub fn get_order(&self, register_id: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .read_json::<Vec<String>>(&self.order_key(register_id))?
            .unwrap_or_default())
    }

    pub fn is_registered(&self, register_id: &str, validator_id: &str) -> Result<bool, RegistryError> {
        Ok(self.read_validator(register_id, validator_id)?.is_some())
    }

    pub fn get_active_count(&self, register_id: &str) -> Result<usize, RegistryError> {
        Ok(self.active_ordered(register_id)?.len())
    }

    /// Drop the snapshot cache for a register. The next read goes to the
    /// store.
    pub fn refresh(&self, register_id: &str) {
        self.invalidate(register_id);
    }

    // -- Roster -------------------------------------------------------------

    pub fn load_roster_sync(&self, register_id: &str) -> Result<Option<AdminRoster>, RegistryError> {
        self.read_json(&self.roster_key(register_id))
    }

    pub fn store_roster(&self, roster: &AdminRoster) -> Result<(), RegistryError> {
        self.write_json(&self.roster_key(&roster.register_id), roster)
    }

    // -- Internals ----------------------------------------------------------

    fn transition(
        &self,
        register_id: &str,
        validator_id: &str,
        status: ValidatorStatus,
    ) -> Result<(), RegistryError> {
        let lock = self.lock_for(register_id);
        let _guard = lock.lock();

        let key = self.validator_key(register_id, validator_id);
        let Some(mut info) = self.read_json::<ValidatorInfo>(&key)? else {
            return Err(RegistryError::NotFound(validator_id.to_string()));
        };
        info.status = status;
        self.write_json(&key, &info)?;

        self.invalidate(register_id);
        self.events.emit(LedgerEvent::ValidatorListChanged {
            register_id: register_id.to_string(),
        });
        info!(register = register_id, validator = validator_id, status = %status,
            "validator status changed");
        Ok(())
    }

    fn read_validator(
        &self,
        register_id: &str,
        validator_id: &str,
    ) -> Result<Option<ValidatorInfo>, RegistryError> {
        if let Some(info) =
            self.read_json::<ValidatorInfo>(&self.validator_key(register_id, validator_id))?
        {
            return Ok(Some(info));
        }
        self.read_json(&self.pending_key(register_id, validator_id))
    }

    fn active_count_locked(&self, register_id: &str) -> Result<usize, RegistryError> {
        // Bypass the cache: callers hold the register lock and need the
        // stored truth.
        let prefix = format!("{}:{register_id}:validator:", self.config.prefix);
        let mut count = 0;
        for (_, value) in self.kv.scan_prefix(&prefix)? {
            let info: ValidatorInfo = serde_json::from_slice(&value)
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
            if info.is_active() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn next_order_index(
        &self,
        register_id: &str,
        validator_id: &str,
    ) -> Result<u64, RegistryError> {
        let key = self.order_key(register_id);
        let mut order: Vec<String> = self.read_json(&key)?.unwrap_or_default();
        let index = order.len() as u64;
        order.push(validator_id.to_string());
        self.write_json(&key, &order)?;
        Ok(index)
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, RegistryError> {
        match self.kv.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RegistryError::Corrupt(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| RegistryError::Corrupt(format!("{key}: {e}")))?;
        self.kv.put(key, &bytes)?;
        Ok(())
    }

    fn invalidate(&self, register_id: &str) {
        self.cache.remove(register_id);
    }
}

#[async_trait]
impl RosterProvider for ValidatorRegistry {
    async fn load_roster(&self, register_id: &str) -> Result<Option<AdminRoster>, ServiceError> {
        self.load_roster_sync(register_id).map_err(|e| match e {
            RegistryError::Store(inner) => inner,
            other => ServiceError::Failed(other.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryKvStore;
    use std::collections::BTreeMap;

    fn registration(id: &str) -> ValidatorRegistration {
        ValidatorRegistration {
            validator_id: id.to_string(),
            public_key: vec![7; 32],
            rpc_endpoint: format!("http://{id}:9000"),
            metadata: BTreeMap::new(),
        }
    }

    fn registry(mode: RegistrationMode, max: usize, min: usize) -> ValidatorRegistry {
        ValidatorRegistry::new(
            Arc::new(MemoryKvStore::new()),
            RegistryConfig {
                prefix: "validators".to_string(),
                mode,
                max_validators: max,
                min_validators: min,
            },
            EventBus::new(),
        )
    }

    #[test]
    fn public_mode_registers_active() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        let info = reg.register("reg-1", registration("v1")).unwrap();
        assert_eq!(info.status, ValidatorStatus::Active);
        assert_eq!(info.order_index, 0);
        assert_eq!(reg.get_active_count("reg-1").unwrap(), 1);
    }

    #[test]
    fn consent_mode_registers_pending() {
        let reg = registry(RegistrationMode::Consent, 10, 1);
        let info = reg.register("reg-1", registration("v1")).unwrap();
        assert_eq!(info.status, ValidatorStatus::Pending);
        assert_eq!(reg.get_active_count("reg-1").unwrap(), 0);
        assert_eq!(reg.pending("reg-1").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_registration_refused() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        reg.register("reg-1", registration("v1")).unwrap();
        assert!(matches!(
            reg.register("reg-1", registration("v1")),
            Err(RegistryError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn order_index_is_sequential_and_never_reused() {
        let reg = registry(RegistrationMode::Public, 10, 0);
        reg.register("reg-1", registration("v1")).unwrap();
        reg.register("reg-1", registration("v2")).unwrap();
        reg.remove_validator("reg-1", "v1").unwrap();
        let v3 = reg.register("reg-1", registration("v3")).unwrap();

        assert_eq!(v3.order_index, 2);
        assert_eq!(
            reg.get_order("reg-1").unwrap(),
            vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]
        );
    }

    #[test]
    fn approve_activates_pending() {
        let reg = registry(RegistrationMode::Consent, 10, 1);
        reg.register("reg-1", registration("v1")).unwrap();

        let mut events = reg.events.subscribe();
        let info = reg.approve_validator("reg-1", "v1", "operator").unwrap();
        assert_eq!(info.status, ValidatorStatus::Active);
        assert_eq!(info.metadata.get("approved_by").unwrap(), "operator");
        assert_eq!(reg.get_active_count("reg-1").unwrap(), 1);
        assert!(reg.pending("reg-1").unwrap().is_empty());

        let event = events.try_recv().unwrap();
        assert!(matches!(event, LedgerEvent::ValidatorApproved { .. }));
    }

    #[test]
    fn approve_requires_consent_mode() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        assert!(matches!(
            reg.approve_validator("reg-1", "v1", "op"),
            Err(RegistryError::WrongMode)
        ));
    }

    #[test]
    fn approve_rejects_at_capacity() {
        let reg = registry(RegistrationMode::Consent, 1, 1);
        reg.register("reg-1", registration("v1")).unwrap();
        reg.register("reg-1", registration("v2")).unwrap();
        reg.approve_validator("reg-1", "v1", "op").unwrap();
        assert!(matches!(
            reg.approve_validator("reg-1", "v2", "op"),
            Err(RegistryError::MaxValidatorsReached(_))
        ));
    }

    #[test]
    fn reject_marks_removed_with_audit_trail() {
        let reg = registry(RegistrationMode::Consent, 10, 1);
        reg.register("reg-1", registration("v1")).unwrap();
        reg.reject_validator("reg-1", "v1", "untrusted operator", "op")
            .unwrap();

        let info = reg.get("reg-1", "v1").unwrap().unwrap();
        assert_eq!(info.status, ValidatorStatus::Removed);
        assert_eq!(
            info.metadata.get("rejection_reason").unwrap(),
            "untrusted operator"
        );
        assert!(matches!(
            reg.approve_validator("reg-1", "v1", "op"),
            Err(RegistryError::NotPending(_))
        ));
    }

    #[test]
    fn removal_respects_minimum() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        reg.register("reg-1", registration("v1")).unwrap();
        assert!(matches!(
            reg.remove_validator("reg-1", "v1"),
            Err(RegistryError::BelowMinimum(_))
        ));

        reg.register("reg-1", registration("v2")).unwrap();
        reg.remove_validator("reg-1", "v1").unwrap();
        assert_eq!(reg.get_active_count("reg-1").unwrap(), 1);
    }

    #[test]
    fn list_is_ordered_and_cached() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        reg.register("reg-1", registration("v2")).unwrap();
        reg.register("reg-1", registration("v1")).unwrap();

        let listed = reg.list("reg-1").unwrap();
        assert_eq!(listed[0].validator_id, "v2"); // registered first → slot 0
        assert_eq!(listed[1].validator_id, "v1");

        // Mutation invalidates the snapshot.
        reg.suspend_validator("reg-1", "v2").unwrap();
        let active = reg.active_ordered("reg-1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].validator_id, "v1");
    }

    #[test]
    fn reputation_penalty_floors_at_zero() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        reg.register("reg-1", registration("v1")).unwrap();
        reg.penalize_reputation("reg-1", "v1", 0.6);
        reg.penalize_reputation("reg-1", "v1", 0.6);
        let info = reg.get("reg-1", "v1").unwrap().unwrap();
        assert_eq!(info.reputation_score, 0.0);
    }

    #[tokio::test]
    async fn roster_store_and_provider() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        assert!(reg.load_roster("reg-1").await.unwrap().is_none());

        reg.store_roster(&AdminRoster {
            register_id: "reg-1".to_string(),
            attestations: vec![],
        })
        .unwrap();
        assert!(reg.load_roster("reg-1").await.unwrap().is_some());
    }

    #[test]
    fn registers_are_isolated() {
        let reg = registry(RegistrationMode::Public, 10, 1);
        reg.register("reg-1", registration("v1")).unwrap();
        assert!(reg.list("reg-2").unwrap().is_empty());
        assert!(!reg.is_registered("reg-2", "v1").unwrap());
    }
}
