use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CacheError;
use crate::store::DurableStore;

/// In-process durable store backed by a shared `HashMap`.
///
/// Clones share the same map, so two `CacheManager`s given clones of one
/// `MemoryStore` behave like two browser tabs over the same `localStorage`.
/// Useful for tests and for hosts with no real persistence.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.state.read().get(key).cloned())
    }

    fn save(&self, key: &str, document: &str) -> Result<(), CacheError> {
        self.state
            .write()
            .insert(key.to_string(), document.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().remove(key);
        Ok(())
    }
}
