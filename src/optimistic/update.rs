use serde::Serialize;

use crate::error::RemoteError;

/// Kind of speculative mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Create,
    Update,
    Delete,
}

/// Lifecycle of an optimistic update.
///
/// `Pending -> Success | Error`, `Error -> Rollback` (automatic or via
/// `cancel`). `Success` and `Rollback` are terminal and the record removes
/// itself after a short grace delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Success,
    Error,
    Rollback,
}

impl UpdateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateStatus::Success | UpdateStatus::Rollback)
    }
}

/// Typed snapshot of an optimistic update.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticUpdate<T> {
    pub id: String,
    pub kind: UpdateKind,
    /// The caller's id for the mutated object, if given.
    pub entity_id: Option<String>,
    /// The optimistic value. `None` for deletes.
    pub data: Option<T>,
    /// Pre-mutation snapshot. `None` for creates without `UpdateOptions::original_data`.
    pub original_data: Option<T>,
    pub timestamp: i64,
    pub status: UpdateStatus,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Type-erased view of an update, used by stats and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub id: String,
    pub kind: UpdateKind,
    pub entity_id: Option<String>,
    pub status: UpdateStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timestamp: i64,
    pub age_ms: i64,
}

pub(crate) type SuccessCallback<T> = Box<dyn FnOnce(T) + Send>;
pub(crate) type ErrorCallback<T> = Box<dyn FnOnce(&RemoteError, Option<T>) + Send>;
pub(crate) type RollbackCallback<T> = Box<dyn FnOnce(T) + Send>;

/// Per-update options: retry limit override, entity id and lifecycle callbacks.
///
/// Each callback fires at most once over the life of the update. `on_error`
/// and `on_rollback` are not exclusive: an update left in `Error` that is
/// later cancelled fires `on_error` first, then `on_rollback`.
///
/// # Example
/// ```ignore
/// let opts = UpdateOptions::new()
///     .max_retries(2)
///     .on_rollback(|original: Article| restore(original));
/// ```
pub struct UpdateOptions<T> {
    pub(crate) max_retries: Option<u32>,
    pub(crate) original_data: Option<T>,
    pub(crate) entity_id: Option<String>,
    pub(crate) on_success: Option<SuccessCallback<T>>,
    pub(crate) on_error: Option<ErrorCallback<T>>,
    pub(crate) on_rollback: Option<RollbackCallback<T>>,
}

impl<T> Default for UpdateOptions<T> {
    fn default() -> Self {
        UpdateOptions {
            max_retries: None,
            original_data: None,
            entity_id: None,
            on_success: None,
            on_error: None,
            on_rollback: None,
        }
    }
}

impl<T> UpdateOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the manager's default retry limit for this update.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Rollback snapshot for a create, e.g. the placeholder it replaces.
    /// Ignored by `update` and `delete`, which take the original directly.
    pub fn original_data(mut self, original: T) -> Self {
        self.original_data = Some(original);
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Called with the confirmed value when the update succeeds.
    pub fn on_success(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Called when retries are exhausted and no automatic rollback happens.
    /// A later `cancel` can still roll the update back.
    pub fn on_error(mut self, f: impl FnOnce(&RemoteError, Option<T>) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called with the original data when the update is rolled back, either
    /// automatically after the last retry or through `cancel`.
    pub fn on_rollback(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_rollback = Some(Box::new(f));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(UpdateStatus::Success.is_terminal());
        assert!(UpdateStatus::Rollback.is_terminal());
        assert!(!UpdateStatus::Pending.is_terminal());
        assert!(!UpdateStatus::Error.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&UpdateStatus::Rollback).unwrap(),
            "\"rollback\""
        );
        assert_eq!(serde_json::to_string(&UpdateKind::Delete).unwrap(), "\"delete\"");
    }
}
