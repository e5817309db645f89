//! Metric events for cache operations.
//!
//! `CacheManager` keeps its own running counters (see `CacheMetrics`); a
//! `MetricsSink` additionally receives one event per operation so hosts can
//! forward them to a real metrics backend.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use newsdesk_cache::{CacheConfig, CacheManager, MetricsSink};
//!
//! let sink = Arc::new(MyMetricsSink::new());
//! let cache = CacheManager::builder(CacheConfig::default())
//!     .metrics_sink(sink.clone())
//!     .build();
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;

/// Metrics emitted by `CacheManager`.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMetric {
    /// Emitted on every `get`.
    Read {
        key: String,
        hit: bool,
        /// True when the miss was caused by an expired entry being dropped.
        expired: bool,
    },
    /// Emitted on every `set`.
    Write {
        key: String,
        /// Size estimate of the written value.
        size: usize,
        /// Key evicted to make room, if any.
        evicted: Option<String>,
    },
    /// Emitted when `delete` removed an entry.
    Remove { key: String },
    /// Emitted on tag/pattern invalidation and `clear`.
    Invalidate {
        /// `tag:<tag>`, `pattern:<regex>` or `all`.
        scope: String,
        removed: usize,
    },
    /// Emitted after every cleanup sweep.
    Cleanup { removed: usize },
}

/// Receives one `CacheMetric` per cache operation.
///
/// `emit` runs under no lock but on the caller's thread, so it should only
/// record the event. Shipping it elsewhere belongs in `flush`.
///
/// ```ignore
/// struct StatsdSink { client: StatsdClient }
///
/// #[async_trait]
/// impl MetricsSink for StatsdSink {
///     fn emit(&self, metric: CacheMetric) {
///         if let CacheMetric::Read { hit, .. } = metric {
///             self.client.incr(if hit { "cache.hit" } else { "cache.miss" });
///         }
///     }
///
///     async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         self.client.send().await
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsSink: Send + Sync {
    fn emit(&self, metric: CacheMetric);

    /// Push anything buffered by `emit`. The host decides when.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A sink that buffers every metric in memory until drained.
#[derive(Default)]
pub struct BufferedSink {
    buffer: Mutex<Vec<CacheMetric>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all buffered metrics, leaving the buffer empty.
    pub fn take(&self) -> Vec<CacheMetric> {
        std::mem::take(&mut *self.buffer.lock())
    }
}

#[async_trait]
impl MetricsSink for BufferedSink {
    fn emit(&self, metric: CacheMetric) {
        self.buffer.lock().push(metric);
    }

    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let drained = self.take();
        tracing::debug!(count = drained.len(), "Flushed buffered cache metrics");
        Ok(())
    }
}
