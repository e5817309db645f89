use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::entry::{EntrySource, SetOptions};
use crate::error::RemoteError;
use crate::optimistic::{OptimisticManager, UpdateKind, UpdateOptions};

/// Options for an `OptimisticMutation`.
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// TTL and tags for the value written under the key.
    pub set_options: SetOptions,
    /// Tags invalidated once the remote confirms the mutation, e.g. the
    /// listings that contain the mutated object.
    pub invalidate_tags: Vec<String>,
    /// Retry limit override for the registered updates.
    pub max_retries: Option<u32>,
}

/// Outcome of one mutation call.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<T> {
    /// Id of the registered optimistic update, usable with
    /// `OptimisticManager::retry_update` and `cancel`.
    pub update_id: String,
    /// The confirmed value, or `None` if the remote call has not succeeded.
    pub value: Option<T>,
}

/// Optimistic write binding for one cache key.
///
/// The new value is written to the cache before the remote call runs, so
/// readers of the key see it immediately. On success the server's value
/// replaces it and `invalidate_tags` are cleared. On rollback the original
/// value is restored, or the key is removed when there was none.
pub struct OptimisticMutation<T> {
    cache: Arc<CacheManager>,
    optimistic: OptimisticManager,
    key: String,
    options: MutationOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OptimisticMutation<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        cache: Arc<CacheManager>,
        optimistic: OptimisticManager,
        key: impl Into<String>,
        options: MutationOptions,
    ) -> Self {
        OptimisticMutation {
            cache,
            optimistic,
            key: key.into(),
            options,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write `data` under the key and create it remotely.
    pub async fn create<F, Fut>(&self, data: T, execute_fn: F) -> MutationResult<T>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        self.apply(Some(&data));
        let update_id = self
            .optimistic
            .create(data, self.update_options(UpdateKind::Create));
        self.execute(UpdateKind::Create, update_id, execute_fn).await
    }

    /// Replace the cached value with `data` and update it remotely.
    ///
    /// The currently cached value is the rollback snapshot. With nothing
    /// cached the mutation behaves like a create.
    pub async fn update<F, Fut>(&self, data: T, execute_fn: F) -> MutationResult<T>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let Some(original) = self.cache.get::<T>(&self.key) else {
            return self.create(data, execute_fn).await;
        };
        self.apply(Some(&data));
        let update_id =
            self.optimistic
                .update(data, original, self.update_options(UpdateKind::Update));
        self.execute(UpdateKind::Update, update_id, execute_fn).await
    }

    /// Remove the cached value and delete it remotely.
    ///
    /// `execute_fn` receives the removed value. Returns `None` without
    /// calling the remote when nothing is cached under the key.
    pub async fn delete<F, Fut>(&self, execute_fn: F) -> Option<MutationResult<T>>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let Some(original) = self.cache.get::<T>(&self.key) else {
            warn!(key = %self.key, "Nothing cached to delete");
            return None;
        };
        self.apply(None);
        let update_id = self
            .optimistic
            .delete(original, self.update_options(UpdateKind::Delete));
        Some(self.execute(UpdateKind::Delete, update_id, execute_fn).await)
    }

    /// Show the optimistic state in the cache: the new value, or no value for a delete.
    fn apply(&self, data: Option<&T>) {
        match data {
            Some(value) => self.cache.set(
                self.key.clone(),
                value.clone(),
                self.options.set_options.clone().source(EntrySource::User),
            ),
            None => {
                self.cache.delete(&self.key);
            }
        }
    }

    async fn execute<F, Fut>(
        &self,
        kind: UpdateKind,
        update_id: String,
        execute_fn: F,
    ) -> MutationResult<T>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        debug!(
            key = %self.key,
            update_id = %update_id,
            kind = ?kind,
            "Optimistic mutation applied"
        );
        let value = self.optimistic.execute(&update_id, execute_fn).await;
        MutationResult { update_id, value }
    }

    fn update_options(&self, kind: UpdateKind) -> UpdateOptions<T> {
        let mut opts = UpdateOptions::new();
        if let Some(max_retries) = self.options.max_retries {
            opts = opts.max_retries(max_retries);
        }

        let cache = self.cache.clone();
        let key = self.key.clone();
        let set_options = self.options.set_options.clone();
        let tags = self.options.invalidate_tags.clone();
        let opts = opts.on_success(move |confirmed: T| {
            if kind == UpdateKind::Delete {
                cache.delete(&key);
            } else {
                cache.set(key.clone(), confirmed, set_options.source(EntrySource::Api));
            }
            for tag in &tags {
                cache.invalidate_by_tag(tag);
            }
        });

        let cache = self.cache.clone();
        let key = self.key.clone();
        let set_options = self.options.set_options.clone();
        let opts = opts.on_rollback(move |original: T| {
            debug!(key = %key, "Restoring value after rollback");
            cache.set(key, original, set_options);
        });

        let cache = self.cache.clone();
        let key = self.key.clone();
        opts.on_error(move |_, original: Option<T>| {
            // Without a snapshot there is nothing worth keeping on screen.
            if original.is_none() {
                cache.delete(&key);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, OptimisticConfig};
    use crate::optimistic::UpdateStatus;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Comment {
        id: Option<u32>,
        body: String,
    }

    fn comment(id: Option<u32>, body: &str) -> Comment {
        Comment {
            id,
            body: body.to_string(),
        }
    }

    fn setup(config: OptimisticConfig) -> (Arc<CacheManager>, OptimisticManager) {
        (
            Arc::new(CacheManager::new(CacheConfig::default())),
            OptimisticManager::new(config),
        )
    }

    fn no_retries() -> OptimisticConfig {
        OptimisticConfig {
            max_retries: 0,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_stores_server_value_and_invalidates() {
        let (cache, optimistic) = setup(OptimisticConfig::default());
        cache.set("comments:all", vec![1, 2], SetOptions::new().tag("comments"));

        let mutation = OptimisticMutation::new(
            cache.clone(),
            optimistic,
            "comment:new",
            MutationOptions {
                invalidate_tags: vec!["comments".to_string()],
                ..Default::default()
            },
        );

        let result = mutation
            .create(comment(None, "hi"), |c: Comment| async move {
                Ok::<_, RemoteError>(Comment { id: Some(7), ..c })
            })
            .await;

        assert_eq!(result.value, Some(comment(Some(7), "hi")));
        assert_eq!(cache.get::<Comment>("comment:new"), Some(comment(Some(7), "hi")));
        assert!(!cache.has("comments:all"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_value_visible_during_request() {
        let (cache, optimistic) = setup(OptimisticConfig::default());
        let mutation = Arc::new(OptimisticMutation::new(
            cache.clone(),
            optimistic,
            "comment:1",
            MutationOptions::default(),
        ));

        let running = {
            let mutation = mutation.clone();
            tokio::spawn(async move {
                mutation
                    .create(comment(Some(1), "draft"), |c: Comment| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        Ok::<_, RemoteError>(c)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(cache.get::<Comment>("comment:1"), Some(comment(Some(1), "draft")));
        assert!(running.await.unwrap().value.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_restores_original() {
        let (cache, optimistic) = setup(no_retries());
        cache.set("comment:1", comment(Some(1), "before"), SetOptions::new());
        let mutation = OptimisticMutation::new(
            cache.clone(),
            optimistic.clone(),
            "comment:1",
            MutationOptions::default(),
        );

        let result = mutation
            .update(comment(Some(1), "after"), |_| async {
                Err::<Comment, RemoteError>("rejected".into())
            })
            .await;

        assert_eq!(result.value, None);
        assert_eq!(cache.get::<Comment>("comment:1"), Some(comment(Some(1), "before")));
        assert_eq!(
            optimistic.get_update::<Comment>(&result.update_id).unwrap().status,
            UpdateStatus::Rollback
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_removes_key() {
        let (cache, optimistic) = setup(no_retries());
        let mutation = OptimisticMutation::new(
            cache.clone(),
            optimistic,
            "comment:new",
            MutationOptions::default(),
        );

        mutation
            .create(comment(None, "hi"), |_| async {
                Err::<Comment, RemoteError>("offline".into())
            })
            .await;

        assert!(!cache.has("comment:new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_without_rollback_keeps_optimistic_value() {
        let (cache, optimistic) = setup(OptimisticConfig {
            max_retries: 0,
            auto_rollback: false,
            ..Default::default()
        });
        cache.set("comment:1", comment(Some(1), "before"), SetOptions::new());
        let mutation = OptimisticMutation::new(
            cache.clone(),
            optimistic.clone(),
            "comment:1",
            MutationOptions::default(),
        );

        let result = mutation
            .update(comment(Some(1), "after"), |_| async {
                Err::<Comment, RemoteError>("offline".into())
            })
            .await;

        assert_eq!(cache.get::<Comment>("comment:1"), Some(comment(Some(1), "after")));
        assert_eq!(optimistic.failed_updates::<Comment>().len(), 1);
        assert_eq!(optimistic.failed_updates::<Comment>()[0].id, result.update_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_rollback() {
        let (cache, optimistic) = setup(no_retries());
        cache.set("comment:1", comment(Some(1), "keep me"), SetOptions::new());
        let mutation = OptimisticMutation::new(
            cache.clone(),
            optimistic,
            "comment:1",
            MutationOptions::default(),
        );

        let result = mutation
            .delete(|_| async { Err::<Comment, RemoteError>("forbidden".into()) })
            .await
            .unwrap();

        assert_eq!(result.value, None);
        assert_eq!(cache.get::<Comment>("comment:1"), Some(comment(Some(1), "keep me")));

        let confirmed = mutation
            .delete(|c: Comment| async move { Ok::<_, RemoteError>(c) })
            .await
            .unwrap();
        assert!(confirmed.value.is_some());
        assert!(!cache.has("comment:1"));
        let again = mutation
            .delete(|c: Comment| async move { Ok::<_, RemoteError>(c) })
            .await;
        assert!(again.is_none());
    }
}
