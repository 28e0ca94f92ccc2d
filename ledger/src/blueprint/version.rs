//! Blueprint version resolution.
//!
//! Blueprints are versioned by publication: each `control.blueprint_publish`
//! transaction committed to a register establishes the blueprint version in
//! force from that point on. Resolving the version that governs a given
//! action means walking the action's transaction chain backwards to the
//! publication it descends from — not simply taking the latest, because a
//! long-running workflow keeps the version it started under.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::{RegisterStore, ServiceError};

/// The control action that publishes a blueprint version.
pub const BLUEPRINT_PUBLISH_ACTION: &str = "control.blueprint_publish";

/// Upper bound on chain-walk length. A workflow chain longer than this is
/// pathological; resolution fails rather than looping.
const MAX_WALK: usize = 4_096;

/// One committed blueprint publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintVersion {
    /// The publication transaction.
    pub tx_id: String,
    pub blueprint_id: String,
    pub published_at: DateTime<Utc>,
    /// True on the most recent publication in a history listing.
    pub is_latest: bool,
}

/// Resolves which blueprint publication governs an action.
pub struct VersionResolver {
    store: Arc<dyn RegisterStore>,
    /// History cache keyed by `(register, blueprint)`.
    histories: DashMap<(String, String), Arc<Vec<BlueprintVersion>>>,
}

impl VersionResolver {
    pub fn new(store: Arc<dyn RegisterStore>) -> Self {
        Self {
            store,
            histories: DashMap::new(),
        }
    }

    /// Walk the transaction chain back from `action_prev_tx_id` to the
    /// publication of `blueprint_id` the action descends from.
    ///
    /// Returns `Ok(None)` when the walk reaches the chain root without
    /// passing a publication.
    pub async fn resolve_for_action(
        &self,
        register_id: &str,
        blueprint_id: &str,
        action_prev_tx_id: &str,
    ) -> Result<Option<BlueprintVersion>, ServiceError> {
        let mut cursor = Some(action_prev_tx_id.to_string());
        let mut seen: HashSet<String> = HashSet::new();
        let mut steps = 0;

        while let Some(tx_id) = cursor {
            if steps >= MAX_WALK || !seen.insert(tx_id.clone()) {
                return Err(ServiceError::Failed(format!(
                    "transaction chain walk aborted at {tx_id} (length or cycle)"
                )));
            }
            steps += 1;

            let Some(tx) = self.store.get_transaction(register_id, &tx_id).await? else {
                return Ok(None);
            };

            if tx.action_id == BLUEPRINT_PUBLISH_ACTION && tx.blueprint_id == blueprint_id {
                debug!(register = register_id, blueprint = blueprint_id, publication = %tx.tx_id,
                    "resolved blueprint version from chain");
                return Ok(Some(BlueprintVersion {
                    tx_id: tx.tx_id,
                    blueprint_id: blueprint_id.to_string(),
                    published_at: tx.created_at,
                    is_latest: false,
                }));
            }

            cursor = tx.previous_tx_id;
        }

        Ok(None)
    }

    /// All publications of a blueprint within a register, oldest first,
    /// with the newest flagged `is_latest`. Cached until invalidated.
    pub async fn version_history(
        &self,
        register_id: &str,
        blueprint_id: &str,
    ) -> Result<Arc<Vec<BlueprintVersion>>, ServiceError> {
        let key = (register_id.to_string(), blueprint_id.to_string());
        if let Some(cached) = self.histories.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let mut publications = Vec::new();
        let mut page = 0;
        const PAGE_SIZE: usize = 256;
        loop {
            let batch = self
                .store
                .get_transactions(register_id, page, PAGE_SIZE)
                .await?;
            let done = batch.len() < PAGE_SIZE;
            for tx in batch {
                if tx.action_id == BLUEPRINT_PUBLISH_ACTION && tx.blueprint_id == blueprint_id {
                    publications.push(BlueprintVersion {
                        tx_id: tx.tx_id,
                        blueprint_id: blueprint_id.to_string(),
                        published_at: tx.created_at,
                        is_latest: false,
                    });
                }
            }
            if done {
                break;
            }
            page += 1;
        }

        publications.sort_by_key(|v| v.published_at);
        if let Some(last) = publications.last_mut() {
            last.is_latest = true;
        }

        let publications = Arc::new(publications);
        self.histories.insert(key, Arc::clone(&publications));
        Ok(publications)
    }

    /// The publication in force at time `t`: the one with the greatest
    /// `published_at` that is `<= t`.
    pub async fn version_as_of(
        &self,
        register_id: &str,
        blueprint_id: &str,
        t: DateTime<Utc>,
    ) -> Result<Option<BlueprintVersion>, ServiceError> {
        let history = self.version_history(register_id, blueprint_id).await?;
        Ok(history
            .iter()
            .filter(|v| v.published_at <= t)
            .max_by_key(|v| v.published_at)
            .cloned())
    }

    /// Drop cached history for one `(register, blueprint)` pair.
    pub fn invalidate(&self, register_id: &str, blueprint_id: &str) {
        self.histories
            .remove(&(register_id.to_string(), blueprint_id.to_string()));
    }

    /// Drop all cached histories for one register (a committed config or
    /// blueprint mutation touched an unknown subset).
    pub fn invalidate_register(&self, register_id: &str) {
        self.histories.retain(|key, _| key.0 != register_id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.histories.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Docket, DocketStatus, Priority, Signature, Transaction};
    use crate::services::InMemoryRegisterStore;
    use std::collections::BTreeMap;

    fn tx(id: &str, action: &str, blueprint: &str, prev: Option<&str>, at: DateTime<Utc>) -> Transaction {
        let payload = serde_json::json!({"id": id});
        Transaction {
            tx_id: id.to_string(),
            register_id: "reg-1".to_string(),
            blueprint_id: blueprint.to_string(),
            action_id: action.to_string(),
            payload_hash: crate::crypto::payload_hash_hex(&payload),
            payload,
            previous_tx_id: prev.map(str::to_string),
            created_at: at,
            expires_at: None,
            priority: Priority::Normal,
            signatures: vec![Signature {
                public_key: vec![1; 32],
                signature_value: vec![2; 64],
                algorithm: "ED25519".to_string(),
                signed_at: at,
                signed_by: None,
            }],
            metadata: BTreeMap::new(),
            added_at: None,
            retry_count: 0,
        }
    }

    async fn store_with(transactions: Vec<Transaction>) -> Arc<InMemoryRegisterStore> {
        let store = Arc::new(InMemoryRegisterStore::new());
        let mut docket = Docket {
            docket_id: "dk-0".to_string(),
            register_id: "reg-1".to_string(),
            docket_number: 0,
            previous_hash: None,
            docket_hash: String::new(),
            merkle_root: String::new(),
            created_at: Utc::now(),
            transactions,
            proposer_validator_id: "v1".to_string(),
            proposer_term: 1,
            proposer_signature: None,
            status: DocketStatus::Confirmed,
            votes: Vec::new(),
            metadata: BTreeMap::new(),
            consensus_achieved_at: None,
        };
        docket.merkle_root = docket.compute_merkle_root();
        docket.docket_hash = docket.compute_hash();
        store.append_docket(&docket).await.unwrap();
        store
    }

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::seconds(1_000 - offset_secs)
    }

    #[tokio::test]
    async fn resolve_walks_back_to_publication() {
        let store = store_with(vec![
            tx("pub-1", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(0)),
            tx("step-1", "1", "bp-1", Some("pub-1"), t(10)),
            tx("step-2", "2", "bp-1", Some("step-1"), t(20)),
        ])
        .await;

        let resolver = VersionResolver::new(store);
        let version = resolver
            .resolve_for_action("reg-1", "bp-1", "step-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version.tx_id, "pub-1");
    }

    #[tokio::test]
    async fn resolve_skips_other_blueprints_publications() {
        let store = store_with(vec![
            tx("pub-a", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(0)),
            tx("pub-b", BLUEPRINT_PUBLISH_ACTION, "bp-2", Some("pub-a"), t(5)),
            tx("step-1", "1", "bp-1", Some("pub-b"), t(10)),
        ])
        .await;

        let resolver = VersionResolver::new(store);
        let version = resolver
            .resolve_for_action("reg-1", "bp-1", "step-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version.tx_id, "pub-a");
    }

    #[tokio::test]
    async fn resolve_without_publication_is_none() {
        let store = store_with(vec![tx("step-1", "1", "bp-1", None, t(0))]).await;
        let resolver = VersionResolver::new(store);
        assert!(resolver
            .resolve_for_action("reg-1", "bp-1", "step-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn history_orders_by_time_and_flags_latest() {
        let store = store_with(vec![
            tx("pub-2", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(50)),
            tx("pub-1", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(0)),
            tx("noise", "1", "bp-1", None, t(25)),
        ])
        .await;

        let resolver = VersionResolver::new(store);
        let history = resolver.version_history("reg-1", "bp-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tx_id, "pub-1");
        assert_eq!(history[1].tx_id, "pub-2");
        assert!(history[1].is_latest);
        assert!(!history[0].is_latest);
    }

    #[tokio::test]
    async fn version_as_of_picks_greatest_not_after() {
        let store = store_with(vec![
            tx("pub-1", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(0)),
            tx("pub-2", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(100)),
        ])
        .await;

        let resolver = VersionResolver::new(store);
        let at = resolver
            .version_as_of("reg-1", "bp-1", t(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at.tx_id, "pub-1");

        let late = resolver
            .version_as_of("reg-1", "bp-1", t(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.tx_id, "pub-2");

        assert!(resolver
            .version_as_of("reg-1", "bp-1", t(-10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invalidate_refreshes_history() {
        let store = store_with(vec![tx("pub-1", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(0))]).await;
        let resolver = VersionResolver::new(Arc::clone(&store) as Arc<dyn RegisterStore>);

        assert_eq!(resolver.version_history("reg-1", "bp-1").await.unwrap().len(), 1);

        // A second publication lands in a new docket.
        let tip = store.read_latest_docket("reg-1").await.unwrap().unwrap();
        let mut next = Docket {
            docket_id: "dk-1".to_string(),
            register_id: "reg-1".to_string(),
            docket_number: 1,
            previous_hash: Some(tip.docket_hash.clone()),
            docket_hash: String::new(),
            merkle_root: String::new(),
            created_at: Utc::now(),
            transactions: vec![tx("pub-2", BLUEPRINT_PUBLISH_ACTION, "bp-1", None, t(60))],
            proposer_validator_id: "v1".to_string(),
            proposer_term: 1,
            proposer_signature: None,
            status: DocketStatus::Confirmed,
            votes: Vec::new(),
            metadata: BTreeMap::new(),
            consensus_achieved_at: None,
        };
        next.merkle_root = next.compute_merkle_root();
        next.docket_hash = next.compute_hash();
        store.append_docket(&next).await.unwrap();

        // Cached history does not see it until invalidated.
        assert_eq!(resolver.version_history("reg-1", "bp-1").await.unwrap().len(), 1);
        resolver.invalidate("reg-1", "bp-1");
        assert_eq!(resolver.version_history("reg-1", "bp-1").await.unwrap().len(), 2);
    }
}
