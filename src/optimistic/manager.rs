use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::update::{
    ErrorCallback, OptimisticUpdate, RollbackCallback, SuccessCallback, UpdateKind, UpdateOptions,
    UpdateStatus, UpdateSummary,
};
use crate::clock::{Clock, SystemClock};
use crate::config::OptimisticConfig;
use crate::error::RemoteError;
use crate::utils::{backoff_delay_ms, generate_id};

type Executor<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<T, RemoteError>> + Send + Sync>;

/// Lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimisticMetrics {
    pub total_updates: u64,
    pub successful_updates: u64,
    pub failed_updates: u64,
    pub rollbacks: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimisticStats {
    pub total_updates: u64,
    pub pending_updates: usize,
    pub failed_updates: usize,
    /// `successful / total` over the manager's lifetime, 0 when nothing ran.
    pub success_rate: f64,
    pub updates: Vec<UpdateSummary>,
}

/// Typed part of a record, stored behind `dyn Any`.
struct Payload<T> {
    data: Option<T>,
    original: Option<T>,
    executor: Option<Executor<T>>,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback<T>>,
    on_rollback: Option<RollbackCallback<T>>,
}

impl<T: Clone> Payload<T> {
    /// Value handed to the remote call and to `on_success` on confirmation.
    fn input(&self) -> Option<T> {
        self.data.clone().or_else(|| self.original.clone())
    }
}

struct UpdateRecord {
    id: String,
    kind: UpdateKind,
    entity_id: Option<String>,
    timestamp: i64,
    status: UpdateStatus,
    retry_count: u32,
    max_retries: u32,
    /// Bumped on every attempt; a result only applies if it still matches.
    attempt: u64,
    /// Set once the update has been counted in `failed_updates`.
    failure_counted: bool,
    payload: Box<dyn Any + Send>,
    retry_timer: Option<JoinHandle<()>>,
    cleanup_timer: Option<JoinHandle<()>>,
}

impl UpdateRecord {
    fn payload_mut<T: 'static>(&mut self) -> Option<&mut Payload<T>> {
        self.payload.downcast_mut::<Payload<T>>()
    }

    fn summary(&self, now: i64) -> UpdateSummary {
        UpdateSummary {
            id: self.id.clone(),
            kind: self.kind,
            entity_id: self.entity_id.clone(),
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            timestamp: self.timestamp,
            age_ms: now - self.timestamp,
        }
    }

    fn snapshot<T: Clone + 'static>(&self) -> Option<OptimisticUpdate<T>> {
        let payload = self.payload.downcast_ref::<Payload<T>>()?;
        Some(OptimisticUpdate {
            id: self.id.clone(),
            kind: self.kind,
            entity_id: self.entity_id.clone(),
            data: payload.data.clone(),
            original_data: payload.original.clone(),
            timestamp: self.timestamp,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
        })
    }

    fn abort_retry(&mut self) {
        if let Some(handle) = self.retry_timer.take() {
            handle.abort();
        }
    }

    fn abort_timers(&mut self) {
        self.abort_retry();
        if let Some(handle) = self.cleanup_timer.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct ManagerState {
    updates: HashMap<String, UpdateRecord>,
    metrics: OptimisticMetrics,
}

struct Inner {
    config: OptimisticConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<ManagerState>,
}

/// Tracks speculative mutations and reconciles them with the remote result.
///
/// An update is registered with `create`, `update` or `delete`, which return
/// its id. `execute` then runs the remote call; failures are retried with
/// exponential backoff up to the update's retry limit, after which the update
/// either rolls back to its original data or stays in the `Error` state.
///
/// Cloning is cheap and clones share the same updates. Timers run on the
/// ambient tokio runtime, so every method that may schedule one (`execute`,
/// `confirm`, `cancel`, `retry_update`) must be called from within it.
#[derive(Clone)]
pub struct OptimisticManager {
    inner: Arc<Inner>,
}

impl OptimisticManager {
    pub fn new(config: OptimisticConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: OptimisticConfig, clock: Arc<dyn Clock>) -> Self {
        OptimisticManager {
            inner: Arc::new(Inner {
                config,
                clock,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &OptimisticConfig {
        &self.inner.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an optimistic create of `data`.
    pub fn create<T>(&self, data: T, opts: UpdateOptions<T>) -> String
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(UpdateKind::Create, Some(data), None, opts)
    }

    /// Register an optimistic update from `original` to `data`.
    pub fn update<T>(&self, data: T, original: T, opts: UpdateOptions<T>) -> String
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(UpdateKind::Update, Some(data), Some(original), opts)
    }

    /// Register an optimistic delete of `original`.
    pub fn delete<T>(&self, original: T, opts: UpdateOptions<T>) -> String
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(UpdateKind::Delete, None, Some(original), opts)
    }

    fn register<T>(
        &self,
        kind: UpdateKind,
        data: Option<T>,
        original: Option<T>,
        opts: UpdateOptions<T>,
    ) -> String
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = self.inner.clock.now_ms();
        let id = generate_id(now);
        let max_retries = opts.max_retries.unwrap_or(self.inner.config.max_retries);
        let original = original.or(opts.original_data);

        let record = UpdateRecord {
            id: id.clone(),
            kind,
            entity_id: opts.entity_id,
            timestamp: now,
            status: UpdateStatus::Pending,
            retry_count: 0,
            max_retries,
            attempt: 0,
            failure_counted: false,
            payload: Box::new(Payload {
                data,
                original,
                executor: None,
                on_success: opts.on_success,
                on_error: opts.on_error,
                on_rollback: opts.on_rollback,
            }),
            retry_timer: None,
            cleanup_timer: None,
        };

        let mut state = self.inner.state.lock();
        state.updates.insert(id.clone(), record);
        state.metrics.total_updates += 1;
        drop(state);

        debug!(update_id = %id, kind = ?kind, max_retries, "Optimistic update registered");
        id
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run the remote call for a pending update.
    ///
    /// `execute_fn` receives the optimistic data (the original snapshot for
    /// deletes). On success the confirmed value is returned and `on_success`
    /// fires. On failure `None` is returned and a retry is scheduled while
    /// the retry budget lasts. A result that arrives after the update was
    /// cancelled, confirmed or superseded by a newer attempt is discarded and
    /// also yields `None`.
    pub async fn execute<T, F, Fut>(&self, update_id: &str, execute_fn: F) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let executor: Executor<T> = Arc::new(move |data| execute_fn(data).boxed());
        {
            let mut state = self.inner.state.lock();
            let payload = state
                .updates
                .get_mut(update_id)
                .and_then(|record| record.payload_mut::<T>());
            match payload {
                Some(payload) => payload.executor = Some(executor.clone()),
                None => {
                    warn!(update_id = %update_id, "Execute called for unknown update");
                    return None;
                }
            }
        }
        self.attempt(update_id.to_string(), executor).await
    }

    /// One remote attempt. Boxed so retry timers can call back into it.
    fn attempt<T>(
        &self,
        update_id: String,
        executor: Executor<T>,
    ) -> BoxFuture<'static, Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let manager = self.clone();
        async move {
            let (input, attempt) = {
                let mut state = manager.inner.state.lock();
                let record = state.updates.get_mut(&update_id)?;
                if record.status != UpdateStatus::Pending {
                    debug!(
                        update_id = %update_id,
                        status = ?record.status,
                        "Update is not pending, skipping attempt"
                    );
                    return None;
                }
                record.abort_retry();
                record.attempt += 1;
                let attempt = record.attempt;
                let input = record.payload_mut::<T>()?.input()?;
                (input, attempt)
            };

            let result = executor(input).await;
            manager.settle(&update_id, attempt, result)
        }
        .boxed()
    }

    /// Apply the outcome of attempt number `attempt`.
    fn settle<T>(
        &self,
        update_id: &str,
        attempt: u64,
        result: Result<T, RemoteError>,
    ) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        let ManagerState { updates, metrics } = &mut *state;

        let Some(record) = updates.get_mut(update_id) else {
            debug!(update_id = %update_id, "Result arrived for a removed update, discarding");
            return None;
        };
        if record.status != UpdateStatus::Pending || record.attempt != attempt {
            debug!(update_id = %update_id, status = ?record.status, "Stale result discarded");
            return None;
        }

        match result {
            Ok(value) => {
                record.status = UpdateStatus::Success;
                metrics.successful_updates += 1;
                let on_success = record.payload_mut::<T>().and_then(|p| p.on_success.take());
                record.cleanup_timer = Some(self.schedule_cleanup(
                    update_id.to_string(),
                    config.success_cleanup_delay_ms,
                ));
                drop(state);

                info!(update_id = %update_id, "Optimistic update confirmed by remote");
                if let Some(callback) = on_success {
                    callback(value.clone());
                }
                Some(value)
            }
            Err(error) => {
                record.retry_count += 1;
                metrics.retries += 1;

                if record.retry_count < record.max_retries {
                    let delay = backoff_delay_ms(config.retry_delay_ms, record.retry_count);
                    warn!(
                        update_id = %update_id,
                        retry_count = record.retry_count,
                        max_retries = record.max_retries,
                        delay_ms = delay,
                        error = %error,
                        "Optimistic update failed, retry scheduled"
                    );
                    let executor = record.payload_mut::<T>()?.executor.clone()?;
                    record.retry_timer =
                        Some(self.schedule_retry(update_id.to_string(), executor, delay));
                    return None;
                }

                record.status = UpdateStatus::Error;
                if !record.failure_counted {
                    record.failure_counted = true;
                    metrics.failed_updates += 1;
                }
                let payload = record.payload_mut::<T>()?;

                if config.auto_rollback
                    && let Some(original) = payload.original.clone()
                {
                    let on_rollback = payload.on_rollback.take();
                    record.status = UpdateStatus::Rollback;
                    metrics.rollbacks += 1;
                    record.cleanup_timer = Some(
                        self.schedule_cleanup(update_id.to_string(), config.rollback_delay_ms),
                    );
                    drop(state);

                    warn!(update_id = %update_id, error = %error, "Retries exhausted, rolled back");
                    if let Some(callback) = on_rollback {
                        callback(original);
                    }
                } else {
                    let on_error = payload.on_error.take();
                    let original = payload.original.clone();
                    drop(state);

                    warn!(
                        update_id = %update_id,
                        error = %error,
                        "Retries exhausted, update failed"
                    );
                    if let Some(callback) = on_error {
                        callback(&error, original);
                    }
                }
                None
            }
        }
    }

    fn schedule_retry<T>(
        &self,
        update_id: String,
        executor: Executor<T>,
        delay_ms: u64,
    ) -> JoinHandle<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = OptimisticManager { inner };
            // Detach our own handle so the attempt does not abort this task.
            {
                let mut state = manager.inner.state.lock();
                if let Some(record) = state.updates.get_mut(&update_id) {
                    record.retry_timer = None;
                }
            }
            debug!(update_id = %update_id, "Retrying optimistic update");
            manager.attempt(update_id, executor).await;
        })
    }

    /// Remove `update_id` after `delay_ms` if it is still in a terminal state.
    fn schedule_cleanup(&self, update_id: String, delay_ms: u64) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock();
                if state
                    .updates
                    .get(&update_id)
                    .is_some_and(|record| record.status.is_terminal())
                {
                    state.updates.remove(&update_id);
                    debug!(update_id = %update_id, "Settled update removed");
                }
            }
        })
    }

    // ========================================================================
    // Manual resolution
    // ========================================================================

    /// Mark an update as succeeded without a remote call and remove it.
    ///
    /// Returns `false` for unknown or already settled updates.
    pub fn confirm<T>(&self, update_id: &str) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let Some(record) = state.updates.get(update_id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        let Some(mut record) = state.updates.remove(update_id) else {
            return false;
        };
        record.abort_timers();
        state.metrics.successful_updates += 1;
        drop(state);

        let callback = record.payload_mut::<T>().and_then(|payload| {
            let value = payload.input()?;
            payload.on_success.take().map(|cb| (cb, value))
        });
        info!(update_id = %update_id, "Optimistic update confirmed");
        if let Some((callback, value)) = callback {
            callback(value);
        }
        true
    }

    /// Abandon an update.
    ///
    /// With original data the update moves to `Rollback`, `on_rollback` fires
    /// and the record is removed after the rollback delay. Without it (a
    /// create) the record is removed immediately. An in-flight attempt's
    /// result is discarded when it arrives.
    pub fn cancel<T>(&self, update_id: &str) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let ManagerState { updates, metrics } = &mut *state;
        let Some(record) = updates.get_mut(update_id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.abort_retry();

        let rollback = record.payload_mut::<T>().and_then(|payload| {
            let original = payload.original.clone()?;
            Some((original, payload.on_rollback.take()))
        });

        match rollback {
            Some((original, on_rollback)) => {
                record.status = UpdateStatus::Rollback;
                metrics.rollbacks += 1;
                let delay = self.inner.config.rollback_delay_ms;
                record.cleanup_timer = Some(self.schedule_cleanup(update_id.to_string(), delay));
                drop(state);

                info!(update_id = %update_id, "Optimistic update cancelled, rolled back");
                if let Some(callback) = on_rollback {
                    callback(original);
                }
            }
            None => {
                if let Some(mut record) = updates.remove(update_id) {
                    record.abort_timers();
                }
                drop(state);
                info!(update_id = %update_id, "Optimistic update cancelled");
            }
        }
        true
    }

    /// Put a failed (or still pending) update back to `Pending` and, if an
    /// executor was supplied to `execute` earlier, run it again in the
    /// background. The retry counter is kept, so a further failure settles
    /// the update immediately. An update is counted in `failed_updates` at
    /// most once, however often it is retried.
    ///
    /// Returns `false` for unknown or settled updates.
    pub fn retry_update<T>(&self, update_id: &str) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let executor = {
            let mut state = self.inner.state.lock();
            let Some(record) = state.updates.get_mut(update_id) else {
                return false;
            };
            if record.status.is_terminal() {
                return false;
            }
            record.abort_retry();
            record.status = UpdateStatus::Pending;
            record.payload_mut::<T>().and_then(|p| p.executor.clone())
        };

        info!(
            update_id = %update_id,
            reexecute = executor.is_some(),
            "Optimistic update reset to pending"
        );
        if let Some(executor) = executor {
            let attempt = self.attempt(update_id.to_string(), executor);
            tokio::spawn(async move {
                attempt.await;
            });
        }
        true
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Typed snapshot of one update. `None` if unknown or stored under another type.
    pub fn get_update<T>(&self, update_id: &str) -> Option<OptimisticUpdate<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner
            .state
            .lock()
            .updates
            .get(update_id)
            .and_then(|record| record.snapshot::<T>())
    }

    /// Pending updates carrying `T`, oldest first.
    pub fn pending_updates<T>(&self) -> Vec<OptimisticUpdate<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.collect(UpdateStatus::Pending)
    }

    /// Updates carrying `T` that exhausted their retries, oldest first.
    pub fn failed_updates<T>(&self) -> Vec<OptimisticUpdate<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.collect(UpdateStatus::Error)
    }

    fn collect<T>(&self, status: UpdateStatus) -> Vec<OptimisticUpdate<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let state = self.inner.state.lock();
        let mut updates: Vec<_> = state
            .updates
            .values()
            .filter(|record| record.status == status)
            .filter_map(|record| record.snapshot::<T>())
            .collect();
        updates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        updates
    }

    pub fn stats(&self) -> OptimisticStats {
        let now = self.inner.clock.now_ms();
        let state = self.inner.state.lock();

        let mut updates: Vec<UpdateSummary> =
            state.updates.values().map(|record| record.summary(now)).collect();
        updates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let count = |status: UpdateStatus| updates.iter().filter(|u| u.status == status).count();
        let total = state.metrics.total_updates;
        OptimisticStats {
            total_updates: total,
            pending_updates: count(UpdateStatus::Pending),
            failed_updates: count(UpdateStatus::Error),
            success_rate: if total == 0 {
                0.0
            } else {
                state.metrics.successful_updates as f64 / total as f64
            },
            updates,
        }
    }

    pub fn metrics(&self) -> OptimisticMetrics {
        self.inner.state.lock().metrics.clone()
    }

    /// Number of tracked updates, settled ones included until their cleanup runs.
    pub fn len(&self) -> usize {
        self.inner.state.lock().updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Drop every update and cancel all timers. No callbacks fire.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for record in state.updates.values_mut() {
            record.abort_timers();
        }
        let dropped = state.updates.len();
        state.updates.clear();
        drop(state);
        info!(dropped, "Optimistic updates cleared");
    }

    /// Drop updates left in the `Error` state. Returns how many were removed.
    pub fn clear_failed(&self) -> usize {
        let mut state = self.inner.state.lock();
        let failed: Vec<String> = state
            .updates
            .iter()
            .filter(|(_, record)| record.status == UpdateStatus::Error)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &failed {
            if let Some(mut record) = state.updates.remove(id) {
                record.abort_timers();
            }
        }
        failed.len()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for record in self.state.get_mut().updates.values_mut() {
            record.abort_timers();
        }
    }
}
