//! Control transaction processing.
//!
//! Control transactions live in the `control.*` action namespace and
//! mutate the validator roster or per-register policy when their docket
//! commits. They ride the same consensus pipeline as ordinary
//! transactions; what differs is the apply step, which lands here after
//! confirmation.
//!
//! Validation happens twice: once pre-admission (rights enforcement)
//! and once here against the concrete registry state at apply time —
//! the roster may have changed between admission and commit.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::blueprint::{BlueprintCache, VersionResolver};
use crate::events::{EventBus, LedgerEvent};
use crate::model::{Docket, Transaction, ValidatorRegistration};
use crate::registry::{RegisterConfigStore, RegistryError, ValidatorRegistry};

// ---------------------------------------------------------------------------
// Action types
// ---------------------------------------------------------------------------

/// The control actions a committed docket may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlActionType {
    ValidatorRegister,
    ValidatorApprove,
    ValidatorSuspend,
    ValidatorRemove,
    ConfigUpdate,
    BlueprintPublish,
    RegisterUpdateMetadata,
    CryptoPolicyUpdate,
}

impl ControlActionType {
    /// Resolve an `action_id` in the control namespace.
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id {
            "control.validator_register" => Some(Self::ValidatorRegister),
            "control.validator_approve" => Some(Self::ValidatorApprove),
            "control.validator_suspend" => Some(Self::ValidatorSuspend),
            "control.validator_remove" => Some(Self::ValidatorRemove),
            "control.config_update" => Some(Self::ConfigUpdate),
            "control.blueprint_publish" => Some(Self::BlueprintPublish),
            "control.register_update_metadata" => Some(Self::RegisterUpdateMetadata),
            "control.crypto_policy_update" => Some(Self::CryptoPolicyUpdate),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ValidatorRegister => "ValidatorRegister",
            Self::ValidatorApprove => "ValidatorApprove",
            Self::ValidatorSuspend => "ValidatorSuspend",
            Self::ValidatorRemove => "ValidatorRemove",
            Self::ConfigUpdate => "ConfigUpdate",
            Self::BlueprintPublish => "BlueprintPublish",
            Self::RegisterUpdateMetadata => "RegisterUpdateMetadata",
            Self::CryptoPolicyUpdate => "CryptoPolicyUpdate",
        }
    }
}

/// One control transaction paired with its resolved action type.
#[derive(Debug, Clone)]
pub struct ControlTx {
    pub action: ControlActionType,
    pub tx: Transaction,
}

/// Result of applying a committed docket's control transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutcome {
    pub success: bool,
    pub actions_applied: usize,
    pub configuration_updated: bool,
    pub validators_modified: bool,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Extracts, validates, and applies control transactions.
pub struct ControlDocketProcessor {
    registry: Arc<ValidatorRegistry>,
    config: Arc<RegisterConfigStore>,
    blueprints: Arc<BlueprintCache>,
    versions: Arc<VersionResolver>,
    events: EventBus,
}

impl ControlDocketProcessor {
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        config: Arc<RegisterConfigStore>,
        blueprints: Arc<BlueprintCache>,
        versions: Arc<VersionResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            config,
            blueprints,
            versions,
            events,
        }
    }

    /// The control transactions of a docket, in docket order.
    /// Transactions in the control namespace with an unknown action are
    /// skipped with a warning — an upgraded peer may know actions we do
    /// not, and unknown actions must not halt the apply path.
    pub fn extract(&self, docket: &Docket) -> Vec<ControlTx> {
        docket
            .transactions
            .iter()
            .filter(|tx| tx.is_control())
            .filter_map(|tx| match ControlActionType::from_action_id(&tx.action_id) {
                Some(action) => Some(ControlTx {
                    action,
                    tx: tx.clone(),
                }),
                None => {
                    warn!(tx = %tx.tx_id, action = %tx.action_id, "unknown control action skipped");
                    None
                }
            })
            .collect()
    }

    pub fn is_control(&self, docket: &Docket) -> bool {
        !self.extract(docket).is_empty()
    }

    /// Validate control transactions against current registry state.
    /// The first violation fails the batch.
    pub fn validate(&self, register_id: &str, controls: &[ControlTx]) -> Result<(), String> {
        for control in controls {
            match control.action {
                ControlActionType::ValidatorRegister => {
                    let validator_id = string_field(&control.tx.payload, "validator_id")
                        .ok_or_else(|| missing(control, "validator_id"))?;
                    if validator_id.trim().is_empty() {
                        return Err(missing(control, "validator_id"));
                    }
                    let endpoint = string_field(&control.tx.payload, "endpoint")
                        .ok_or_else(|| missing(control, "endpoint"))?;
                    if !is_absolute_uri(&endpoint) {
                        return Err(format!(
                            "control {}: endpoint {endpoint} is not an absolute URI",
                            control.tx.tx_id
                        ));
                    }
                    let public_key = string_field(&control.tx.payload, "public_key")
                        .ok_or_else(|| missing(control, "public_key"))?;
                    if public_key.trim().is_empty() {
                        return Err(missing(control, "public_key"));
                    }
                }
                ControlActionType::ValidatorApprove => {
                    let validator_id = string_field(&control.tx.payload, "validator_id")
                        .ok_or_else(|| missing(control, "validator_id"))?;
                    let known = self
                        .registry
                        .is_registered(register_id, &validator_id)
                        .map_err(|e| e.to_string())?;
                    if !known {
                        return Err(format!(
                            "control {}: validator {validator_id} does not exist",
                            control.tx.tx_id
                        ));
                    }
                }
                ControlActionType::ValidatorRemove => {
                    let active = self
                        .registry
                        .get_active_count(register_id)
                        .map_err(|e| e.to_string())?;
                    let minimum = self.registry.config().min_validators;
                    if active.saturating_sub(1) < minimum {
                        return Err(format!(
                            "control {}: removal would take register {register_id} below minimum",
                            control.tx.tx_id
                        ));
                    }
                }
                ControlActionType::ConfigUpdate => {
                    let path = string_field(&control.tx.payload, "path")
                        .ok_or_else(|| missing(control, "path"))?;
                    if !RegisterConfigStore::is_allowed_path(&path) {
                        return Err(format!("Unknown configuration path: {path}"));
                    }
                }
                ControlActionType::ValidatorSuspend
                | ControlActionType::BlueprintPublish
                | ControlActionType::RegisterUpdateMetadata
                | ControlActionType::CryptoPolicyUpdate => {}
            }
        }
        Ok(())
    }

    /// Apply the control transactions of a committed docket, in order.
    ///
    /// A single failing action does not stop the rest — the docket is
    /// already committed cohort-wide, and applying as much as possible
    /// keeps this node closest to the shared state. Failures mark the
    /// outcome unsuccessful for the caller to surface.
    pub fn apply_committed(&self, register_id: &str, docket: &Docket) -> ControlOutcome {
        let controls = self.extract(docket);
        let mut outcome = ControlOutcome {
            success: true,
            actions_applied: 0,
            configuration_updated: false,
            validators_modified: false,
        };

        for control in &controls {
            match self.apply_one(register_id, docket, control) {
                Ok(effect) => {
                    outcome.actions_applied += 1;
                    outcome.validators_modified |= effect.validators;
                    outcome.configuration_updated |= effect.configuration;
                    self.events.emit(LedgerEvent::ControlActionApplied {
                        register_id: register_id.to_string(),
                        tx_id: control.tx.tx_id.clone(),
                        action_type: control.action.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(register = register_id, tx = %control.tx.tx_id,
                        action = control.action.name(), error = %e, "control action failed");
                    outcome.success = false;
                }
            }
        }

        if outcome.validators_modified {
            self.registry.refresh(register_id);
        }
        if outcome.configuration_updated {
            self.config.refresh(register_id);
            self.versions.invalidate_register(register_id);
        }

        if outcome.actions_applied > 0 {
            info!(register = register_id, docket = %docket.docket_id,
                applied = outcome.actions_applied, success = outcome.success,
                "control docket applied");
        }
        outcome
    }

    fn apply_one(
        &self,
        register_id: &str,
        docket: &Docket,
        control: &ControlTx,
    ) -> Result<Effect, String> {
        let payload = &control.tx.payload;
        match control.action {
            ControlActionType::ValidatorRegister => {
                let registration = ValidatorRegistration {
                    validator_id: string_field(payload, "validator_id")
                        .ok_or_else(|| missing(control, "validator_id"))?,
                    public_key: crate::crypto::b64::decode(
                        &string_field(payload, "public_key")
                            .ok_or_else(|| missing(control, "public_key"))?,
                    )
                    .map_err(|e| format!("public_key: {e}"))?,
                    rpc_endpoint: string_field(payload, "endpoint")
                        .ok_or_else(|| missing(control, "endpoint"))?,
                    metadata: Default::default(),
                };
                match self.registry.register(register_id, registration) {
                    Ok(_) | Err(RegistryError::AlreadyRegistered(_)) => {}
                    Err(e) => return Err(e.to_string()),
                }
                Ok(Effect::validators())
            }
            ControlActionType::ValidatorApprove => {
                let validator_id = string_field(payload, "validator_id")
                    .ok_or_else(|| missing(control, "validator_id"))?;
                self.registry
                    .approve_validator(register_id, &validator_id, &docket.proposer_validator_id)
                    .map_err(|e| e.to_string())?;
                Ok(Effect::validators())
            }
            ControlActionType::ValidatorSuspend => {
                let validator_id = string_field(payload, "validator_id")
                    .ok_or_else(|| missing(control, "validator_id"))?;
                self.registry
                    .suspend_validator(register_id, &validator_id)
                    .map_err(|e| e.to_string())?;
                Ok(Effect::validators())
            }
            ControlActionType::ValidatorRemove => {
                let validator_id = string_field(payload, "validator_id")
                    .ok_or_else(|| missing(control, "validator_id"))?;
                self.registry
                    .remove_validator(register_id, &validator_id)
                    .map_err(|e| e.to_string())?;
                Ok(Effect::validators())
            }
            ControlActionType::ConfigUpdate => {
                let path =
                    string_field(payload, "path").ok_or_else(|| missing(control, "path"))?;
                let value =
                    string_field(payload, "value").ok_or_else(|| missing(control, "value"))?;
                self.config
                    .apply_update(register_id, &path, &value)
                    .map_err(|e| e.to_string())?;
                Ok(Effect::configuration())
            }
            ControlActionType::BlueprintPublish => {
                self.blueprints.invalidate(&control.tx.blueprint_id);
                self.versions
                    .invalidate(register_id, &control.tx.blueprint_id);
                self.events.emit(LedgerEvent::VersionChanged {
                    register_id: register_id.to_string(),
                    blueprint_id: control.tx.blueprint_id.clone(),
                });
                Ok(Effect::none())
            }
            ControlActionType::RegisterUpdateMetadata
            | ControlActionType::CryptoPolicyUpdate => {
                // The register metadata and crypto policy documents live
                // in register storage; our share of the effect is the
                // configuration refresh triggered below.
                Ok(Effect::configuration())
            }
        }
    }
}

struct Effect {
    validators: bool,
    configuration: bool,
}

impl Effect {
    fn validators() -> Self {
        Self {
            validators: true,
            configuration: false,
        }
    }
    fn configuration() -> Self {
        Self {
            validators: false,
            configuration: true,
        }
    }
    fn none() -> Self {
        Self {
            validators: false,
            configuration: false,
        }
    }
}

fn string_field(payload: &Value, field: &str) -> Option<String> {
    payload.get(field)?.as_str().map(str::to_string)
}

fn missing(control: &ControlTx, field: &str) -> String {
    format!("control {} is missing {field}", control.tx.tx_id)
}

/// Minimal absolute-URI check: a non-empty alphabetic-initial scheme
/// followed by `://` and a non-empty remainder.
fn is_absolute_uri(candidate: &str) -> bool {
    let Some((scheme, rest)) = candidate.split_once("://") else {
        return false;
    };
    if scheme.is_empty() || rest.is_empty() {
        return false;
    }
    let mut chars = scheme.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    first_ok
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
