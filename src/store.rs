use crate::error::CacheError;

/// A durable key-value store the cache mirrors itself into.
///
/// The cache writes its whole entry map as one document under a single
/// reserved key, so implementations only deal in opaque strings. This plays
/// the role `localStorage` plays in a browser tab.
///
/// Calls happen synchronously inside cache operations; implementations should
/// be quick and must not block on the async runtime.
pub trait DurableStore: Send + Sync {
    /// A name for logs.
    ///
    /// # Example
    /// - "memory"
    /// - "file"
    fn name(&self) -> &'static str;

    /// Read the document stored under `key`. `None` if nothing was stored.
    fn load(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Replace the document stored under `key`.
    fn save(&self, key: &str, document: &str) -> Result<(), CacheError>;

    /// Remove the document stored under `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}
