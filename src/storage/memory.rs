use dashmap::DashMap;
use std::sync::Arc;

/// The node's share of the key space.
///
/// Cloning is cheap and every clone sees the same map; get/put/remove need no external
/// locking, so the store is handed to every connection task as-is.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    entries: Arc<DashMap<String, String>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites. Returns the previous value, if any.
    pub fn put(&self, key: String, value: String) -> Option<String> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
