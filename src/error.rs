/// Error type for the cache's internal seams (durable storage, document
/// decoding, configuration).
///
/// Public `CacheManager` operations never return this: they log it and carry on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A durable store read or write failed.
    #[error("[{backend}] persistence error for key '{key}': {message}")]
    Persistence {
        backend: String,
        key: String,
        message: String,
    },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An invalidation pattern was not a valid regular expression.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    /// A persisted document was written by an incompatible format version.
    #[error("unsupported cache format version {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },
    /// Configuration or telemetry setup failed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a new persistence error.
    pub fn persistence(
        backend: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Persistence {
            backend: backend.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a remote mutation (the user-supplied execute function).
pub type RemoteError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of a failed read, surfaced to the UI layer by read hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Transport failure: no response was received.
    Network,
    /// The server answered with an error status.
    Api { status: u16 },
    /// The response did not have the expected shape.
    Validation,
    Unknown,
}

impl FetchErrorKind {
    fn label(&self) -> String {
        match self {
            FetchErrorKind::Network => "network error".to_string(),
            FetchErrorKind::Api { status } => format!("api error ({status})"),
            FetchErrorKind::Validation => "validation error".to_string(),
            FetchErrorKind::Unknown => "unknown error".to_string(),
        }
    }
}

/// Typed error returned by fetch functions bound to a read hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", .kind.label())]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        FetchError {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Api { status }, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Validation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unknown, message)
    }

    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Network failures and 5xx/429 responses are retryable; validation errors are not.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FetchErrorKind::Network | FetchErrorKind::Unknown => true,
            FetchErrorKind::Api { status } => status >= 500 || status == 429,
            FetchErrorKind::Validation => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_display() {
        let err = CacheError::persistence("file", "app-cache", "disk full");
        assert_eq!(
            err.to_string(),
            "[file] persistence error for key 'app-cache': disk full"
        );
    }

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::network("timeout").is_retryable());
        assert!(FetchError::api(503, "unavailable").is_retryable());
        assert!(FetchError::api(429, "slow down").is_retryable());
        assert!(!FetchError::api(404, "missing").is_retryable());
        assert!(!FetchError::validation("bad shape").is_retryable());
    }

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(
            FetchError::api(500, "boom").to_string(),
            "api error (500): boom"
        );
        assert_eq!(
            FetchError::validation("missing slug").to_string(),
            "validation error: missing slug"
        );
    }
}
