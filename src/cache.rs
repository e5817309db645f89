use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::builder::CacheManagerBuilder;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, EntrySource, FORMAT_VERSION, PersistedCache, SetOptions};
use crate::error::CacheError;
use crate::keys::EntityKind;
use crate::store::DurableStore;
use crate::stores::metrics::{CacheMetric, MetricsSink};
use crate::sync::{ChangeNotifier, NoopNotifier, SyncEvent};
use crate::utils::generate_id;

/// Running counters kept by a `CacheManager`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Entries removed by `delete`, lazy expiry on read, or eviction.
    pub deletes: u64,
    /// Entries removed by tag/pattern invalidation.
    pub invalidations: u64,
    /// Current number of entries.
    pub size: usize,
    /// Time of the last cleanup sweep, `None` before the first one.
    pub last_cleanup: Option<i64>,
}

/// Per-entry view returned by `CacheManager::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub key: String,
    pub age_ms: i64,
    pub ttl_ms: i64,
    pub tags: Vec<String>,
    pub size: usize,
    pub version: u64,
    pub source: EntrySource,
}

/// Aggregated cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    /// `hits / (hits + misses)`, or 0 before any read.
    pub hit_rate: f64,
    pub metrics: CacheMetrics,
    /// Entries sorted by key.
    pub entries: Vec<EntrySnapshot>,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    metrics: CacheMetrics,
    next_seq: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn sync_size(&mut self) {
        self.metrics.size = self.entries.len();
    }

    /// Remove every entry matching `pred`, returning how many were removed.
    fn remove_where(&mut self, mut pred: impl FnMut(&str, &CacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| !pred(key, entry));
        let removed = before - self.entries.len();
        self.sync_size();
        removed
    }

    /// Evict oldest-written entries until there is room for one more.
    ///
    /// Eviction is by write timestamp (ties broken by write order), not by
    /// last access.
    fn evict_for_insert(&mut self, max_size: usize) -> Option<String> {
        self.evict_down_to(max_size.saturating_sub(1))
    }

    /// Evict oldest-written entries until at most `limit` remain. Returns the
    /// last key evicted.
    fn evict_down_to(&mut self, limit: usize) -> Option<String> {
        let mut evicted = None;
        while self.entries.len() > limit {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.timestamp, entry.seq))
                .map(|(key, _)| key.clone());
            let Some(key) = oldest else { break };
            self.entries.remove(&key);
            self.metrics.deletes += 1;
            evicted = Some(key);
        }
        evicted
    }
}

/// TTL + tag cache with a size bound, optional persistence and cross-instance sync.
///
/// Values of any `Serialize` type are stored type-erased and read back through
/// typed `get::<V>` calls. Every operation is a single atomic step over the
/// entry map; none of them fail: persistence and serialization problems are
/// logged and the operation continues.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(CacheManager::new(CacheConfig::default()));
/// cache.init();
///
/// cache.set("article:hello", article, SetOptions::new().tag("articles"));
/// let cached: Option<Article> = cache.get("article:hello");
///
/// cache.invalidate_by_tag("articles");
/// cache.dispose();
/// ```
pub struct CacheManager {
    config: CacheConfig,
    instance_id: String,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn DurableStore>>,
    notifier: Arc<dyn ChangeNotifier>,
    sink: Option<Arc<dyn MetricsSink>>,
    state: Mutex<CacheState>,
    initialized: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheManager {
    /// Create a cache with the system clock, no durable store and no sync.
    pub fn new(config: CacheConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
        CacheManagerBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: CacheConfig,
        clock: Option<Arc<dyn Clock>>,
        store: Option<Arc<dyn DurableStore>>,
        notifier: Option<Arc<dyn ChangeNotifier>>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let instance_id = generate_id(clock.now_ms());
        CacheManager {
            config,
            instance_id,
            clock,
            store,
            notifier: notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            sink,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
                next_seq: 0,
            }),
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Unique id of this instance, used as the origin of sync events.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The time source shared with hooks bound to this cache.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load persisted entries and start the background tasks: the periodic
    /// cleanup sweep and, when enabled, the cross-instance sync listener.
    ///
    /// Must be called from within a tokio runtime. Calling it again before
    /// `dispose` does nothing.
    pub fn init(self: &Arc<Self>) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let loaded = self.reload_from_storage();

        let mut tasks = self.tasks.lock();
        tasks.push(spawn_cleanup(
            Arc::downgrade(self),
            self.config.cleanup_interval(),
        ));

        if self.config.sync_across_instances
            && let Some(rx) = self.notifier.subscribe()
        {
            tasks.push(spawn_sync_listener(Arc::downgrade(self), rx));
        }

        info!(
            instance_id = %self.instance_id,
            loaded,
            background_tasks = tasks.len(),
            "Cache manager initialized"
        );
    }

    /// Stop the background tasks. Entries stay in memory.
    pub fn dispose(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        if self.initialized.swap(false, Ordering::SeqCst) {
            info!(instance_id = %self.instance_id, "Cache manager disposed");
        }
    }

    // ========================================================================
    // Core operations
    // ========================================================================

    /// Return the cached value, or `None` on a miss.
    ///
    /// An expired entry is deleted and counted as a miss. A value stored under
    /// a different type that cannot be decoded as `V` is also a miss.
    pub fn get<V>(&self, key: &str) -> Option<V>
    where
        V: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();

        let (result, expired) = match state.entries.get(key) {
            None => (None, false),
            Some(entry) if entry.is_expired(now) => (None, true),
            Some(entry) => match entry.read::<V>() {
                Ok(value) => (Some(value), false),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value has an unexpected type");
                    (None, false)
                }
            },
        };

        if expired {
            state.entries.remove(key);
            state.metrics.deletes += 1;
            state.sync_size();
            self.persist(&state);
        }

        if result.is_some() {
            state.metrics.hits += 1;
        } else {
            state.metrics.misses += 1;
        }
        drop(state);

        debug!(key = %key, hit = result.is_some(), expired, "Cache read");
        self.emit(CacheMetric::Read {
            key: key.to_string(),
            hit: result.is_some(),
            expired,
        });
        result
    }

    /// Whether a live (unexpired) entry exists for `key`. Does not touch metrics.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Store `data` under `key`, replacing any existing entry.
    ///
    /// When the cache is full and `key` is new, the entry with the oldest write
    /// timestamp is evicted first.
    pub fn set<V>(&self, key: impl Into<String>, data: V, opts: SetOptions)
    where
        V: Serialize + Send + Sync + 'static,
    {
        let key = key.into();
        let now = self.clock.now_ms();
        let mut entry = CacheEntry::from_typed(data, now, &opts, self.config.default_ttl_ms);
        let size = entry.metadata.size;

        let mut state = self.state.lock();
        let evicted = if state.entries.contains_key(&key) {
            None
        } else {
            state.evict_for_insert(self.config.max_size_non_zero())
        };
        entry.seq = state.next_seq();
        state.entries.insert(key.clone(), entry);
        state.metrics.sets += 1;
        state.sync_size();
        self.persist(&state);
        drop(state);

        if let Some(ref evicted_key) = evicted {
            debug!(key = %key, evicted = %evicted_key, "Evicted oldest cache entry");
        }
        debug!(key = %key, size, "Cache write");
        self.emit(CacheMetric::Write { key, size, evicted });
    }

    /// Remove `key`. Returns true if an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.entries.remove(key).is_some();
        if existed {
            state.metrics.deletes += 1;
            state.sync_size();
            self.persist(&state);
        }
        drop(state);

        if existed {
            self.emit(CacheMetric::Remove {
                key: key.to_string(),
            });
        }
        existed
    }

    /// Remove every entry tagged with `tag`. Returns the number removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let removed = self.remove_matching(|_, entry| entry.has_tag(tag));
        debug!(tag = %tag, removed, "Invalidated by tag");
        self.emit(CacheMetric::Invalidate {
            scope: format!("tag:{}", tag),
            removed,
        });
        removed
    }

    /// Remove every entry whose key matches the regular expression `pattern`.
    ///
    /// An invalid pattern removes nothing and is logged.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let regex = match compile_pattern(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(error = %e, "Skipping invalidation with invalid pattern");
                return 0;
            }
        };

        let removed = self.remove_matching(|key, _| regex.is_match(key));
        debug!(pattern = %pattern, removed, "Invalidated by pattern");
        self.emit(CacheMetric::Invalidate {
            scope: format!("pattern:{}", pattern),
            removed,
        });
        removed
    }

    /// Invalidate everything cached for an entity type: both its tag and
    /// every key matching its pattern (`^articles:` for articles).
    pub fn invalidate_entity(&self, kind: EntityKind) -> usize {
        let regex = match compile_pattern(&kind.key_pattern()) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(error = %e, "Entity key pattern rejected, invalidating by tag only");
                None
            }
        };
        let removed = self.remove_matching(|key, entry| {
            entry.has_tag(kind.tag()) || regex.as_ref().is_some_and(|re| re.is_match(key))
        });
        debug!(entity = ?kind, removed, "Invalidated entity");
        self.emit(CacheMetric::Invalidate {
            scope: format!("entity:{}", kind.tag()),
            removed,
        });
        removed
    }

    /// Invalidate a single article: its detail key and its per-article tag.
    pub fn invalidate_article(&self, slug: &str) -> usize {
        let key = crate::keys::article(slug);
        let tag = crate::keys::article_tag(slug);
        let removed = self.remove_matching(|k, entry| k == key || entry.has_tag(&tag));
        self.emit(CacheMetric::Invalidate {
            scope: format!("tag:{}", tag),
            removed,
        });
        removed
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.sync_size();
        self.persist(&state);
        drop(state);

        info!(removed, "Cache cleared");
        self.emit(CacheMetric::Invalidate {
            scope: "all".to_string(),
            removed,
        });
    }

    /// Delete every expired entry. Returns the number removed.
    ///
    /// Runs periodically once `init` has been called; safe to call manually.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let removed = state.remove_where(|_, entry| entry.is_expired(now));
        state.metrics.deletes += removed as u64;
        state.metrics.last_cleanup = Some(now);
        if removed > 0 {
            self.persist(&state);
        }
        drop(state);

        debug!(removed, "Cache cleanup sweep");
        self.emit(CacheMetric::Cleanup { removed });
        removed
    }

    /// Read-through helper: return the cached value, or call `fetch`, cache
    /// its result under `key` with `opts` and return it.
    ///
    /// Fetch errors are returned as-is and nothing is cached.
    pub async fn get_or_fetch<V, E, F, Fut>(
        &self,
        key: &str,
        opts: SetOptions,
        fetch: F,
    ) -> Result<V, E>
    where
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get::<V>(key) {
            return Ok(value);
        }

        let value = fetch().await?;
        self.set(key, value.clone(), opts);
        Ok(value)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of entries currently stored (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let state = self.state.lock();

        let lookups = state.metrics.hits + state.metrics.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.metrics.hits as f64 / lookups as f64
        };

        let mut entries: Vec<EntrySnapshot> = state
            .entries
            .iter()
            .map(|(key, entry)| EntrySnapshot {
                key: key.clone(),
                age_ms: entry.age_ms(now),
                ttl_ms: entry.ttl,
                tags: entry.tags.clone(),
                size: entry.metadata.size,
                version: entry.version,
                source: entry.metadata.source,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: state.entries.len(),
            hit_rate,
            metrics: state.metrics.clone(),
            entries,
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Replace the in-memory map with the document in the durable store.
    ///
    /// Returns the number of entries loaded. The replacement is wholesale: local
    /// writes not yet visible in the store are lost. Unreadable or
    /// incompatible documents are discarded and leave the cache unchanged.
    pub fn reload_from_storage(&self) -> usize {
        let Some(store) = self.store.as_ref().filter(|_| self.config.persist) else {
            return 0;
        };
        let storage_key = &self.config.storage_key;

        let raw = match store.load(storage_key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(backend = store.name(), error = %e, "Failed to load persisted cache");
                return 0;
            }
        };

        let document = match raw.as_deref().map(PersistedCache::decode).transpose() {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    backend = store.name(),
                    error = %e,
                    "Discarding unreadable persisted cache"
                );
                if let Err(e) = store.remove(storage_key) {
                    warn!(backend = store.name(), error = %e, "Failed to remove persisted cache");
                }
                return 0;
            }
        };

        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.entries.clear();
        for (key, persisted) in document.map(|d| d.entries).unwrap_or_default() {
            let seq = state.next_seq();
            let entry = CacheEntry::from_persisted(persisted, seq);
            if !entry.is_expired(now) {
                state.entries.insert(key, entry);
            }
        }
        // The document may come from an instance with a larger bound.
        let before = state.entries.len();
        state.evict_down_to(self.config.max_size_non_zero());
        let evicted = before - state.entries.len();
        state.sync_size();
        let loaded = state.entries.len();
        drop(state);

        debug!(backend = store.name(), loaded, evicted, "Loaded persisted cache");
        loaded
    }

    /// Write the whole map to the durable store and announce the write.
    ///
    /// Called with the state lock held so documents are written in mutation order.
    fn persist(&self, state: &CacheState) {
        if !self.config.persist {
            return;
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let mut entries: Vec<(String, _)> = Vec::with_capacity(state.entries.len());
        for (key, entry) in &state.entries {
            match entry.to_persisted() {
                Some(persisted) => entries.push((key.clone(), persisted)),
                None => debug!(key = %key, "Skipping unserializable entry"),
            }
        }
        let document = PersistedCache {
            version: FORMAT_VERSION,
            entries,
        };

        let result = document
            .encode()
            .and_then(|raw| store.save(&self.config.storage_key, &raw));
        match result {
            Ok(()) => {
                if self.config.sync_across_instances {
                    self.notifier.publish(SyncEvent {
                        storage_key: self.config.storage_key.clone(),
                        origin: self.instance_id.clone(),
                    });
                }
            }
            Err(e) => warn!(backend = store.name(), error = %e, "Failed to persist cache"),
        }
    }

    fn remove_matching(&self, pred: impl FnMut(&str, &CacheEntry) -> bool) -> usize {
        let mut state = self.state.lock();
        let removed = state.remove_where(pred);
        if removed > 0 {
            state.metrics.invalidations += removed as u64;
            self.persist(&state);
        }
        removed
    }

    fn emit(&self, metric: CacheMetric) {
        if let Some(sink) = &self.sink {
            sink.emit(metric);
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, CacheError> {
    Regex::new(pattern).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn spawn_cleanup(cache: Weak<CacheManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else { break };
            cache.cleanup();
        }
    })
}

fn spawn_sync_listener(
    cache: Weak<CacheManager>,
    mut rx: broadcast::Receiver<SyncEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = rx.recv().await;
            let Some(cache) = cache.upgrade() else { break };
            match event {
                Ok(event) => {
                    if event.origin == cache.instance_id
                        || event.storage_key != cache.config.storage_key
                    {
                        continue;
                    }
                    let loaded = cache.reload_from_storage();
                    info!(origin = %event.origin, loaded, "Reloaded cache after external write");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache sync listener lagged, reloading");
                    cache.reload_from_storage();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
