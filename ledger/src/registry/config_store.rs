//! Per-register consensus configuration store.
//!
//! Each register's [`ConsensusConfig`] originates in its genesis
//! configuration and changes only through committed
//! `control.config_update` transactions. Updates address a single field
//! by dotted path; the allow-list below is the complete set of paths a
//! control transaction may touch — anything else is rejected at
//! validation time.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::ConsensusConfig;
use crate::services::{KeyValueStore, ServiceError};

/// Dotted configuration paths a `control.config_update` may modify.
pub const ALLOWED_CONFIG_PATHS: &[&str] = &[
    "consensus.docket_timeout_ms",
    "consensus.vote_timeout_ms",
    "consensus.max_signatures_per_docket",
    "consensus.max_transactions_per_docket",
    "consensus.docket_build_interval_ms",
    "consensus.docket_build_size_threshold",
    "consensus.approval_threshold",
    "consensus.max_retries",
];

/// KV-backed store of per-register consensus configuration.
pub struct RegisterConfigStore {
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
    cache: DashMap<String, ConsensusConfig>,
}

impl RegisterConfigStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
            cache: DashMap::new(),
        }
    }

    fn key(&self, register_id: &str) -> String {
        format!("{}:{register_id}:consensus-config", self.prefix)
    }

    /// The configuration in force for a register. Registers with no
    /// stored genesis configuration run on defaults.
    pub fn get(&self, register_id: &str) -> Result<ConsensusConfig, ServiceError> {
        if let Some(cached) = self.cache.get(register_id) {
            return Ok(cached.clone());
        }

        let config = match self.kv.get(&self.key(register_id))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ServiceError::Failed(format!("corrupt consensus config: {e}")))?,
            None => ConsensusConfig::default(),
        };
        self.cache.insert(register_id.to_string(), config.clone());
        Ok(config)
    }

    /// Install a register's configuration (the genesis path).
    pub fn set(&self, register_id: &str, config: &ConsensusConfig) -> Result<(), ServiceError> {
        let bytes = serde_json::to_vec(config)
            .map_err(|e| ServiceError::Failed(format!("config serialize: {e}")))?;
        self.kv.put(&self.key(register_id), &bytes)?;
        self.cache.insert(register_id.to_string(), config.clone());
        Ok(())
    }

    /// Whether a dotted path may be updated by a control transaction.
    pub fn is_allowed_path(path: &str) -> bool {
        ALLOWED_CONFIG_PATHS.contains(&path)
    }

    /// Apply one `control.config_update` to a register's configuration.
    pub fn apply_update(
        &self,
        register_id: &str,
        path: &str,
        value: &str,
    ) -> Result<(), ServiceError> {
        if !Self::is_allowed_path(path) {
            return Err(ServiceError::Failed(format!(
                "Unknown configuration path: {path}"
            )));
        }

        let mut config = self.get(register_id)?;
        let parse_err =
            |e: &dyn std::fmt::Display| ServiceError::Failed(format!("bad value for {path}: {e}"));

        match path {
            "consensus.docket_timeout_ms" => {
                config.docket_timeout_ms = value.parse().map_err(|e| parse_err(&e))?
            }
            "consensus.vote_timeout_ms" => {
                config.vote_timeout_ms = value.parse().map_err(|e| parse_err(&e))?
            }
            "consensus.max_signatures_per_docket" => {
                config.max_signatures_per_docket = value.parse().map_err(|e| parse_err(&e))?
            }
            "consensus.max_transactions_per_docket" => {
                config.max_transactions_per_docket = value.parse().map_err(|e| parse_err(&e))?
            }
            "consensus.docket_build_interval_ms" => {
                config.docket_build_interval_ms = value.parse().map_err(|e| parse_err(&e))?
            }
            "consensus.docket_build_size_threshold" => {
                config.docket_build_size_threshold = value.parse().map_err(|e| parse_err(&e))?
            }
            "consensus.approval_threshold" => {
                let threshold: f64 = value.parse().map_err(|e| parse_err(&e))?;
                if !(0.0..1.0).contains(&threshold) {
                    return Err(ServiceError::Failed(format!(
                        "approval_threshold must be in [0, 1): {threshold}"
                    )));
                }
                config.approval_threshold = threshold;
            }
            "consensus.max_retries" => {
                config.max_retries = value.parse().map_err(|e| parse_err(&e))?
            }
            _ => unreachable!("path gated by allow-list"),
        }

        self.set(register_id, &config)?;
        info!(register = register_id, path, value, "consensus configuration updated");
        Ok(())
    }

    /// Drop the cache for a register; the next read hits the store.
    pub fn refresh(&self, register_id: &str) {
        self.cache.remove(register_id);
    }
}
