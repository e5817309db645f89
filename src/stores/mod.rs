//! Durable store implementations and the metrics sink.

pub mod file;
pub mod memory;
pub mod metrics;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use metrics::{BufferedSink, CacheMetric, MetricsSink};
