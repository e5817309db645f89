//! Shared utilities for the cache library.

use serde::Serialize;

/// Serialize `value` to JSON with object keys in sorted order.
///
/// `serde_json::Value` keeps maps in a `BTreeMap`, so routing through it
/// makes the output independent of field or insertion order. Values that
/// cannot be serialized render as `null`.
pub fn stable_stringify<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_value(value)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| "null".to_string())
}

/// Generate a fresh id of the form `{timestamp}-{random suffix}`.
pub fn generate_id(now_ms: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now_ms, &suffix[..9])
}

/// Delay before retry number `attempt` (zero-based): `base_ms * 2^attempt`.
///
/// Saturates instead of overflowing for large attempt counts.
pub fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt))
}
