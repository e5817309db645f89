//! Composition root owning the shared cache and optimistic manager.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::cache::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::FetchError;
use crate::hooks::{MutationOptions, OptimisticMutation, Query, QueryOptions};
use crate::optimistic::OptimisticManager;
use crate::store::DurableStore;
use crate::sync::ChangeNotifier;

/// Shared caches handed to every consumer of the application.
///
/// Both managers share one clock. `init` starts the cache's background
/// work and `dispose` stops it and drops outstanding optimistic updates,
/// e.g. on logout.
#[derive(Clone)]
pub struct AppCaches {
    pub cache: Arc<CacheManager>,
    pub optimistic: OptimisticManager,
}

impl AppCaches {
    /// Wire both managers from settings, with an optional durable store and
    /// change notifier for the cache.
    pub fn from_settings(
        settings: &Settings,
        store: Option<Arc<dyn DurableStore>>,
        notifier: Option<Arc<dyn ChangeNotifier>>,
    ) -> Self {
        Self::with_clock(settings, store, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: &Settings,
        store: Option<Arc<dyn DurableStore>>,
        notifier: Option<Arc<dyn ChangeNotifier>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut builder = CacheManager::builder(settings.cache.clone()).clock(clock.clone());
        if let Some(store) = store {
            builder = builder.store(store);
        }
        if let Some(notifier) = notifier {
            builder = builder.notifier(notifier);
        }

        AppCaches {
            cache: Arc::new(builder.build()),
            optimistic: OptimisticManager::with_clock(settings.optimistic.clone(), clock),
        }
    }

    /// Load persisted entries and start background tasks. Requires a tokio runtime.
    pub fn init(&self) {
        self.cache.init();
        info!(instance_id = %self.cache.instance_id(), "Application caches ready");
    }

    pub fn dispose(&self) {
        self.cache.dispose();
        self.optimistic.clear();
        info!(instance_id = %self.cache.instance_id(), "Application caches disposed");
    }

    /// Bind a read query to `key` on the shared cache.
    pub fn query<T, F, Fut>(
        &self,
        key: impl Into<String>,
        fetcher: F,
        options: QueryOptions,
    ) -> Query<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        Query::new(self.cache.clone(), key, fetcher, options)
    }

    /// Bind an optimistic mutation to `key` on the shared managers.
    pub fn mutation<T>(
        &self,
        key: impl Into<String>,
        options: MutationOptions,
    ) -> OptimisticMutation<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        OptimisticMutation::new(self.cache.clone(), self.optimistic.clone(), key, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::SetOptions;
    use crate::optimistic::UpdateOptions;
    use crate::stores::memory::MemoryStore;

    #[tokio::test]
    async fn test_from_settings_applies_config() {
        let settings = Settings::from_toml_str(
            r#"
            [cache]
            storage_key = "newsdesk"
            max_size = 2

            [optimistic]
            max_retries = 5
            "#,
        )
        .unwrap();
        let store = MemoryStore::new();
        let caches = AppCaches::from_settings(&settings, Some(Arc::new(store.clone())), None);
        caches.init();

        caches.cache.set("a", 1, SetOptions::new());
        assert!(store.load("newsdesk").unwrap().is_some());
        assert_eq!(caches.optimistic.config().max_retries, 5);
        caches.dispose();
    }

    #[tokio::test]
    async fn test_dispose_clears_optimistic_updates() {
        let caches = AppCaches::with_clock(
            &Settings::default(),
            None,
            None,
            Arc::new(ManualClock::new(0)),
        );
        caches.init();
        caches.optimistic.create(1u32, UpdateOptions::new());
        assert_eq!(caches.optimistic.len(), 1);

        caches.dispose();
        assert!(caches.optimistic.is_empty());
    }

    #[tokio::test]
    async fn test_query_and_mutation_share_the_cache() {
        let caches = AppCaches::from_settings(&Settings::default(), None, None);
        let mutation = caches.mutation::<String>("greeting", MutationOptions::default());
        mutation
            .create("hello".to_string(), |s: String| async move {
                Ok::<_, crate::error::RemoteError>(s)
            })
            .await;

        let query = caches.query(
            "greeting",
            || async { Err::<String, _>(FetchError::unknown("not called")) },
            QueryOptions::default(),
        );
        assert_eq!(query.state().data.as_deref(), Some("hello"));
    }
}
