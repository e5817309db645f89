//! Builder for wiring a `CacheManager` to its collaborators.

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::store::DurableStore;
use crate::stores::metrics::MetricsSink;
use crate::sync::ChangeNotifier;

/// Builder for `CacheManager`.
///
/// Every collaborator is optional: the defaults are the system clock, no
/// durable store, a no-op change notifier and no metrics sink.
///
/// # Example
///
/// ```ignore
/// use newsdesk_cache::{BroadcastNotifier, CacheConfig, CacheManager, MemoryStore};
/// use std::sync::Arc;
///
/// let storage = MemoryStore::new();
/// let notifier = BroadcastNotifier::default();
///
/// let tab = CacheManager::builder(CacheConfig::default())
///     .store(Arc::new(storage.clone()))
///     .notifier(Arc::new(notifier.clone()))
///     .build();
/// ```
pub struct CacheManagerBuilder {
    config: CacheConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn DurableStore>>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl CacheManagerBuilder {
    pub fn new(config: CacheConfig) -> Self {
        CacheManagerBuilder {
            config,
            clock: None,
            store: None,
            notifier: None,
            sink: None,
        }
    }

    /// Time source for entry timestamps and expiry checks.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Durable store the entry map is mirrored into (when `config.persist` is set).
    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Channel used to announce and receive writes from other instances.
    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the cache. Call `init` on the result to load persisted entries
    /// and start background tasks.
    pub fn build(self) -> CacheManager {
        CacheManager::from_parts(
            self.config,
            self.clock,
            self.store,
            self.notifier,
            self.sink,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::SetOptions;
    use crate::stores::memory::MemoryStore;

    #[test]
    fn test_builder_defaults() {
        let cache = CacheManagerBuilder::new(CacheConfig::default()).build();
        cache.set("k", 1, SetOptions::new());
        assert_eq!(cache.get::<i32>("k"), Some(1));
        assert_eq!(cache.config().storage_key, "app-cache");
    }

    #[test]
    fn test_builder_wires_store_and_clock() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(42);
        let cache = CacheManagerBuilder::new(CacheConfig::default())
            .store(Arc::new(store.clone()))
            .clock(Arc::new(clock))
            .build();

        cache.set("k", 1, SetOptions::new());
        assert!(store.load("app-cache").unwrap().is_some());
        assert!(cache.instance_id().starts_with("42-"));
    }

    #[test]
    fn test_persist_disabled_never_writes() {
        let store = MemoryStore::new();
        let cache = CacheManagerBuilder::new(CacheConfig {
            persist: false,
            ..Default::default()
        })
        .store(Arc::new(store.clone()))
        .build();

        cache.set("k", 1, SetOptions::new());
        assert!(store.is_empty());
    }
}
