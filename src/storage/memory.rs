use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{DurableStorage, StorageResult};

/// Process-local storage. Clones share the same map, which lets a test keep a handle
/// to inspect what the session store persisted.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    map: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    /// Seed with initial entries, as if left behind by a previous run.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let s = Self::new();
        {
            let mut w = s.map.write();
            for (k, v) in entries { w.insert(k.into(), v.into()); }
        }
        s
    }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
    pub fn contains(&self, key: &str) -> bool { self.map.read().contains_key(key) }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.map.write().remove(key);
        Ok(())
    }
}
