//! # Blueprint Cache
//!
//! Read-through cache over the external blueprint service. Blueprints are
//! immutable once published (a new version is a new publication), so the
//! cache never expires entries on its own — invalidation is explicit and
//! comes only from committed control transactions.

pub mod version;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::model::Blueprint;
use crate::services::{BlueprintService, ServiceError};

pub use version::{BlueprintVersion, VersionResolver};

/// Read-through blueprint cache.
pub struct BlueprintCache {
    service: Arc<dyn BlueprintService>,
    cache: DashMap<String, Arc<Blueprint>>,
}

impl BlueprintCache {
    pub fn new(service: Arc<dyn BlueprintService>) -> Self {
        Self {
            service,
            cache: DashMap::new(),
        }
    }

    /// Fetch a blueprint, hitting the service only on a cache miss.
    /// `Ok(None)` (unknown blueprint) is not cached, so a later
    /// publication becomes visible without an invalidation.
    pub async fn get(&self, blueprint_id: &str) -> Result<Option<Arc<Blueprint>>, ServiceError> {
        if let Some(cached) = self.cache.get(blueprint_id) {
            return Ok(Some(Arc::clone(&cached)));
        }

        match self.service.get_blueprint(blueprint_id).await? {
            Some(blueprint) => {
                let blueprint = Arc::new(blueprint);
                self.cache
                    .insert(blueprint_id.to_string(), Arc::clone(&blueprint));
                debug!(blueprint = blueprint_id, "blueprint cached");
                Ok(Some(blueprint))
            }
            None => Ok(None),
        }
    }

    /// Drop one cached blueprint.
    pub fn invalidate(&self, blueprint_id: &str) {
        self.cache.remove(blueprint_id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryBlueprintService;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        inner: InMemoryBlueprintService,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl BlueprintService for CountingService {
        async fn get_blueprint(
            &self,
            blueprint_id: &str,
        ) -> Result<Option<Blueprint>, ServiceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.get_blueprint(blueprint_id).await
        }
    }

    fn service_with(blueprint_id: &str) -> Arc<CountingService> {
        let inner = InMemoryBlueprintService::new();
        inner.publish(Blueprint {
            blueprint_id: blueprint_id.to_string(),
            title: "Test".to_string(),
            version: 1,
            participants: vec![],
            actions: vec![],
        });
        Arc::new(CountingService {
            inner,
            fetches: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn second_get_hits_cache() {
        let service = service_with("bp-1");
        let cache = BlueprintCache::new(Arc::clone(&service) as Arc<dyn BlueprintService>);

        assert!(cache.get("bp-1").await.unwrap().is_some());
        assert!(cache.get("bp-1").await.unwrap().is_some());
        assert_eq!(service.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_then_get_fetches_exactly_once_more() {
        let service = service_with("bp-1");
        let cache = BlueprintCache::new(Arc::clone(&service) as Arc<dyn BlueprintService>);

        cache.get("bp-1").await.unwrap();
        cache.invalidate("bp-1");
        cache.get("bp-1").await.unwrap();
        cache.get("bp-1").await.unwrap();
        assert_eq!(service.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_blueprint_is_not_cached() {
        let service = service_with("bp-1");
        let cache = BlueprintCache::new(Arc::clone(&service) as Arc<dyn BlueprintService>);

        assert!(cache.get("bp-ghost").await.unwrap().is_none());
        service.inner.publish(Blueprint {
            blueprint_id: "bp-ghost".to_string(),
            title: "Late".to_string(),
            version: 1,
            participants: vec![],
            actions: vec![],
        });
        assert!(cache.get("bp-ghost").await.unwrap().is_some());
    }
}
