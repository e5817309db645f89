//! Consumer-facing bindings built on `CacheManager` and `OptimisticManager`.

pub mod mutation;
pub mod query;

pub use mutation::{MutationOptions, MutationResult, OptimisticMutation};
pub use query::{MAX_RETRY_ATTEMPTS, Query, QueryOptions, QueryState};
