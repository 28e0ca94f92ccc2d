//! Key-value persistence abstraction.
//!
//! The validator roster, order list, pending set, and admin roster are
//! stored as JSON values under structured keys
//! (`{prefix}:{register}:{list|order|validator:{id}|pending:{id}}`). The
//! production deployment points this at Redis; the embedded [`SledKvStore`]
//! and the in-memory [`MemoryKvStore`] implement the same contract so the
//! registry code never knows which store backs it.

use dashmap::DashMap;

use super::ServiceError;

/// Minimal synchronous key-value contract.
///
/// Implementations must make `put` durable before returning (to their own
/// durability standard — memory, fsync, or replicated) and must support
/// prefix scans for list-style keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), ServiceError>;
    fn delete(&self, key: &str) -> Result<bool, ServiceError>;
    /// All `(key, value)` pairs whose key starts with `prefix`, in key
    /// order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Process-local store for tests and dev mode.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), ServiceError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, ServiceError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError> {
        let mut results: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Sled
// ---------------------------------------------------------------------------

/// Embedded sled-backed store.
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    /// Open (creating if needed) a store at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, ServiceError> {
        let db = sled::open(path)
            .map_err(|e| ServiceError::Failed(format!("failed to open kv store: {e}")))?;
        Ok(Self { db })
    }

    /// Open a temporary store wiped on drop.
    pub fn open_temporary() -> Result<Self, ServiceError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| ServiceError::Failed(format!("failed to open temporary kv store: {e}")))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        self.db
            .get(key.as_bytes())
            .map(|opt| opt.map(|ivec| ivec.to_vec()))
            .map_err(|e| ServiceError::Transient(e.to_string()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), ServiceError> {
        self.db
            .insert(key.as_bytes(), value)
            .map(|_| ())
            .map_err(|e| ServiceError::Transient(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<bool, ServiceError> {
        self.db
            .remove(key.as_bytes())
            .map(|old| old.is_some())
            .map_err(|e| ServiceError::Transient(e.to_string()))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError> {
        let mut results = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.map_err(|e| ServiceError::Transient(e.to_string()))?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| ServiceError::Failed("non-utf8 key in kv store".to_string()))?;
            results.push((key, value.to_vec()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert!(store.get("reg:list").unwrap().is_none());

        store.put("reg:list", b"[\"v1\"]").unwrap();
        store.put("reg:validator:v1", b"{}").unwrap();
        store.put("reg:validator:v2", b"{}").unwrap();
        store.put("other:key", b"x").unwrap();

        assert_eq!(store.get("reg:list").unwrap().unwrap(), b"[\"v1\"]");

        let scanned = store.scan_prefix("reg:validator:").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, "reg:validator:v1");

        assert!(store.delete("reg:validator:v1").unwrap());
        assert!(!store.delete("reg:validator:v1").unwrap());
        assert_eq!(store.scan_prefix("reg:validator:").unwrap().len(), 1);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryKvStore::new());
    }

    #[test]
    fn sled_store_contract() {
        exercise(&SledKvStore::open_temporary().unwrap());
    }
}
