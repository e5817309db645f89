//! Optimistic updates: apply a mutation locally, reconcile with the remote
//! result, retry with backoff and roll back on failure.

mod manager;
mod update;

pub use manager::{OptimisticManager, OptimisticMetrics, OptimisticStats};
pub use update::{OptimisticUpdate, UpdateKind, UpdateOptions, UpdateStatus, UpdateSummary};
