//! Blueprint service client contract.

use async_trait::async_trait;
use dashmap::DashMap;

use super::ServiceError;
use crate::model::Blueprint;

/// Read access to published blueprints.
#[async_trait]
pub trait BlueprintService: Send + Sync {
    /// Fetch a blueprint definition by ID. `Ok(None)` means the blueprint
    /// does not exist; transport failures are `Err`.
    async fn get_blueprint(&self, blueprint_id: &str) -> Result<Option<Blueprint>, ServiceError>;
}

/// In-memory blueprint catalog for dev mode and tests.
#[derive(Default)]
pub struct InMemoryBlueprintService {
    blueprints: DashMap<String, Blueprint>,
}

impl InMemoryBlueprintService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, blueprint: Blueprint) {
        self.blueprints
            .insert(blueprint.blueprint_id.clone(), blueprint);
    }
}

#[async_trait]
impl BlueprintService for InMemoryBlueprintService {
    async fn get_blueprint(&self, blueprint_id: &str) -> Result<Option<Blueprint>, ServiceError> {
        Ok(self.blueprints.get(blueprint_id).map(|b| b.clone()))
    }
}
