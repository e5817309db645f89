//! Cross-instance change notification.
//!
//! After persisting, a `CacheManager` publishes a `SyncEvent`; other managers
//! sharing the same durable store listen and reload their in-memory map from
//! it. This mirrors the browser `storage` event between tabs.
//!
//! Sync is best-effort and eventually consistent. A reload replaces the local
//! map wholesale, so a local write racing a remote event can be lost.

use tokio::sync::broadcast;
use tracing::debug;

/// Announces that the document under `storage_key` was rewritten by `origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub storage_key: String,
    /// Instance id of the writer, so a manager can ignore its own writes.
    pub origin: String,
}

/// Publish/subscribe capability used for cross-instance sync.
pub trait ChangeNotifier: Send + Sync {
    /// Announce a local write.
    fn publish(&self, event: SyncEvent);

    /// Listen for writes. `None` when this notifier never delivers events.
    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEvent>>;
}

/// Notifier for targets without any cross-instance channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn publish(&self, _event: SyncEvent) {}

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEvent>> {
        None
    }
}

/// In-process notifier backed by a tokio broadcast channel.
///
/// Clones share the channel. A subscriber that falls behind by more than the
/// channel capacity skips the missed events; since any event triggers a full
/// reload, skipping is harmless.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SyncEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        BroadcastNotifier { tx }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn publish(&self, event: SyncEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "Published cache sync event"),
            // No listeners yet - nothing to sync
            Err(_) => debug!("No receivers for cache sync event"),
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEvent>> {
        Some(self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(origin: &str) -> SyncEvent {
        SyncEvent {
            storage_key: "app-cache".into(),
            origin: origin.into(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all_subscribers() {
        let notifier = BroadcastNotifier::default();
        let mut first = notifier.subscribe().unwrap();
        let mut second = notifier.clone().subscribe().unwrap();

        notifier.publish(event("tab-1"));

        assert_eq!(first.recv().await.unwrap(), event("tab-1"));
        assert_eq!(second.recv().await.unwrap(), event("tab-1"));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        BroadcastNotifier::new(0).publish(event("tab-1"));
        assert!(NoopNotifier.subscribe().is_none());
    }
}
