//! newsdesk-cache - Client-side caching and optimistic updates for a news site
//!
//! This library provides:
//! - A TTL cache with tag and pattern invalidation and bounded size
//! - Mirroring into a durable store with cross-instance reloads
//! - Optimistic mutations with retry backoff and rollback
//! - Stale-while-revalidate read queries
//!
//! # Example
//!
//! ```ignore
//! use newsdesk_cache::{keys, AppCaches, QueryOptions, SetOptions, Settings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::load("newsdesk.toml").unwrap_or_default();
//!     let caches = AppCaches::from_settings(&settings, None, None);
//!     caches.init();
//!
//!     let key = keys::article("hello-world");
//!     let article = caches.query(
//!         key,
//!         || async { api::fetch_article("hello-world").await },
//!         QueryOptions {
//!             set_options: SetOptions::new().tag("articles"),
//!             ..Default::default()
//!         },
//!     );
//!     let current = article.load().await;
//!
//!     caches.dispose();
//! }
//! ```

mod builder;
mod cache;
pub mod clock;
pub mod config;
mod context;
mod entry;
mod error;
pub mod hooks;
pub mod keys;
pub mod optimistic;
mod store;
pub mod stores;
pub mod sync;
pub mod telemetry;
mod utils;

// Re-export public API
pub use builder::CacheManagerBuilder;
pub use cache::{CacheManager, CacheMetrics, CacheStats, EntrySnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, LogFormat, LoggingSettings, OptimisticConfig, Settings};
pub use context::AppCaches;
pub use entry::{CacheEntry, EntryMetadata, EntrySource, SetOptions};
pub use error::{CacheError, FetchError, FetchErrorKind, RemoteError};
pub use hooks::{
    MutationOptions, MutationResult, OptimisticMutation, Query, QueryOptions, QueryState,
};
pub use keys::EntityKind;
pub use optimistic::{
    OptimisticManager, OptimisticMetrics, OptimisticStats, OptimisticUpdate, UpdateKind,
    UpdateOptions, UpdateStatus, UpdateSummary,
};
pub use store::DurableStore;
pub use stores::file::FileStore;
pub use stores::memory::MemoryStore;
pub use stores::metrics::{BufferedSink, CacheMetric, MetricsSink};
pub use sync::{BroadcastNotifier, ChangeNotifier, NoopNotifier, SyncEvent};
pub use utils::stable_stringify;
