use futures::FutureExt;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::entry::SetOptions;
use crate::error::FetchError;
use crate::utils::backoff_delay_ms;

/// Upper bound on `Query::retry` attempts.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Options for a `Query`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// TTL and tags applied when a fetched value is cached.
    pub set_options: SetOptions,
    /// Keep showing existing data flagged `is_stale` during a forced refetch
    /// instead of raising `loading`.
    pub stale_while_revalidate: bool,
    /// Base of the `retry` backoff.
    pub retry_delay_ms: u64,
    /// Attempts allowed through `retry`, capped at `MAX_RETRY_ATTEMPTS`.
    pub max_retry_attempts: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            set_options: SetOptions::default(),
            stale_while_revalidate: true,
            retry_delay_ms: 1000,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
        }
    }
}

/// Observable state of a `Query`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub is_stale: bool,
    pub error: Option<FetchError>,
    pub last_fetched: Option<i64>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        QueryState {
            data: None,
            loading: false,
            is_stale: false,
            error: None,
            last_fetched: None,
        }
    }
}

/// Stale-while-revalidate read binding of one cache key to a fetch function.
///
/// Construction reads the cache synchronously, so a warm key is visible in
/// `state()` right away without a loading phase. Each fetch supersedes the
/// previous one: the older request is aborted and its result, should it
/// still arrive, never reaches the state. After `dispose` no result does.
///
/// State changes are published on a `tokio::sync::watch` channel (see
/// `subscribe`).
pub struct Query<T> {
    cache: Arc<CacheManager>,
    key: String,
    fetcher: Fetcher<T>,
    options: QueryOptions,
    state: watch::Sender<QueryState<T>>,
    inflight: Mutex<Option<(u64, AbortHandle)>>,
    generation: AtomicU64,
    retry_attempts: AtomicU32,
    disposed: AtomicBool,
}

impl<T> Query<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F, Fut>(
        cache: Arc<CacheManager>,
        key: impl Into<String>,
        fetcher: F,
        options: QueryOptions,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let key = key.into();
        let initial = QueryState {
            data: cache.get::<T>(&key),
            ..QueryState::default()
        };
        let (state, _) = watch::channel(initial);

        Query {
            cache,
            key,
            fetcher: Arc::new(move || fetcher().boxed()),
            options,
            state,
            inflight: Mutex::new(None),
            generation: AtomicU64::new(0),
            retry_attempts: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state snapshot.
    pub fn state(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.state.subscribe()
    }

    /// Serve the cached value if present, otherwise fetch it.
    pub async fn load(&self) -> Option<T> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(value) = self.cache.get::<T>(&self.key) {
            self.state.send_modify(|s| {
                s.data = Some(value.clone());
                s.loading = false;
                s.is_stale = false;
                s.error = None;
            });
            return Some(value);
        }
        self.fetch(false).await
    }

    /// Fetch from the remote, bypassing the cache.
    pub async fn refetch(&self) -> Option<T> {
        self.fetch(true).await
    }

    /// Refetch after an exponential backoff delay.
    ///
    /// Returns `None` without fetching once the attempt budget is spent, or
    /// when the last error cannot be fixed by asking again (validation errors,
    /// 4xx responses other than 429). A successful fetch resets the budget.
    pub async fn retry(&self) -> Option<T> {
        if let Some(error) = self.state.borrow().error.as_ref()
            && !error.is_retryable()
        {
            debug!(key = %self.key, error = %error, "Last error is not retryable");
            return None;
        }

        let limit = self.options.max_retry_attempts.min(MAX_RETRY_ATTEMPTS);
        let attempt = self.retry_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= limit {
            self.retry_attempts.store(limit, Ordering::SeqCst);
            warn!(key = %self.key, attempts = limit, "Retry budget exhausted");
            return None;
        }

        let delay = backoff_delay_ms(self.options.retry_delay_ms, attempt);
        debug!(key = %self.key, attempt = attempt + 1, delay_ms = delay, "Retrying query");
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.fetch(true).await
    }

    /// Delete the key from the cache and reset local state.
    pub fn invalidate(&self) {
        self.abort_inflight();
        self.cache.delete(&self.key);
        self.retry_attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(QueryState::default());
    }

    /// Abort any in-flight fetch and stop accepting results.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.abort_inflight();
    }

    fn abort_inflight(&self) {
        // Bumping the generation also voids results already past the abort point.
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some((_, handle)) = self.inflight.lock().take() {
            handle.abort();
        }
    }

    async fn fetch(&self, force: bool) -> Option<T> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle, registration) = AbortHandle::new_pair();
        let previous = self.inflight.lock().replace((generation, handle));
        if let Some((_, previous)) = previous {
            debug!(key = %self.key, "Superseding in-flight fetch");
            previous.abort();
        }

        let has_data = self.state.borrow().data.is_some();
        let show_stale = force && has_data && self.options.stale_while_revalidate;
        self.state.send_modify(|s| {
            s.loading = !show_stale;
            s.is_stale = show_stale;
            s.error = None;
        });

        let result = Abortable::new((self.fetcher)(), registration).await;

        if self.disposed.load(Ordering::SeqCst)
            || self.generation.load(Ordering::SeqCst) != generation
        {
            debug!(key = %self.key, "Discarding superseded fetch result");
            return None;
        }
        {
            let mut inflight = self.inflight.lock();
            if inflight.as_ref().is_some_and(|(g, _)| *g == generation) {
                inflight.take();
            }
        }

        match result {
            Err(_aborted) => None,
            Ok(Ok(value)) => {
                self.cache
                    .set(self.key.clone(), value.clone(), self.options.set_options.clone());
                self.retry_attempts.store(0, Ordering::SeqCst);
                let now = self.cache.clock().now_ms();
                self.state.send_modify(|s| {
                    s.data = Some(value.clone());
                    s.loading = false;
                    s.is_stale = false;
                    s.error = None;
                    s.last_fetched = Some(now);
                });
                Some(value)
            }
            Ok(Err(error)) => {
                warn!(key = %self.key, error = %error, "Query fetch failed");
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.is_stale = false;
                    s.error = Some(error);
                });
                None
            }
        }
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.inflight.get_mut().take() {
            handle.abort();
        }
    }
}
