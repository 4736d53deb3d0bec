use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use trail_core::Clock;
use trail_core::model::{
    GenerateTrailRequest, Lesson, LessonId, LessonProgressPatch, ModuleId, Trail,
    TrailGenerationStatus, TrailId, TrailModule,
};

use super::snapshot::TrailSnapshot;
use crate::api::TrailApi;
use crate::config::StoreConfig;
use crate::error::{TrailApiError, TrailStoreError};
use crate::subscription::{self, SubscriptionHandle};

struct ActiveSubscription {
    epoch: u64,
    handle: SubscriptionHandle,
    regenerating: bool,
}

struct StoreInner {
    api: Arc<dyn TrailApi>,
    config: StoreConfig,
    clock: Clock,
    state: watch::Sender<Arc<TrailSnapshot>>,
    subscriptions: Mutex<HashMap<TrailId, ActiveSubscription>>,
    next_epoch: AtomicU64,
    disposed: AtomicBool,
}

/// Single source of truth for a learner's trails and running generations.
///
/// Commands talk to the `TrailApi`, apply optimistic changes where the
/// service contract allows it, and publish a new immutable `TrailSnapshot`
/// after every change. Dropping the store cancels every open subscription.
pub struct TrailStore {
    inner: Arc<StoreInner>,
}

impl TrailStore {
    #[must_use]
    pub fn new(api: Arc<dyn TrailApi>, config: StoreConfig) -> Self {
        Self::with_clock(api, config, Clock::default())
    }

    /// Like `new`, stamping optimistic completions with `clock`.
    #[must_use]
    pub fn with_clock(api: Arc<dyn TrailApi>, config: StoreConfig, clock: Clock) -> Self {
        let (state, _) = watch::channel(Arc::new(TrailSnapshot::default()));
        Self {
            inner: Arc::new(StoreInner {
                api,
                config,
                clock,
                state,
                subscriptions: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TrailSnapshot> {
        Arc::clone(&self.inner.state.borrow())
    }

    /// Receiver notified with every new snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<TrailSnapshot>> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    /// Whether a generation subscription is open for `trail_id`.
    #[must_use]
    pub fn is_watching(&self, trail_id: &TrailId) -> bool {
        self.inner.subscriptions().contains_key(trail_id)
    }

    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.inner.subscriptions().len()
    }

    pub fn clear_error(&self) {
        self.inner.update(TrailSnapshot::clear_error);
    }

    /// Replace the active trail list with the service's.
    ///
    /// On failure the previous list stays and `error` is set.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` if the store is disposed or the request fails.
    pub async fn load_active_trails(&self) -> Result<(), TrailStoreError> {
        self.inner.ensure_live()?;
        self.inner.update(|s| s.set_loading(true));

        match self.inner.api.list_active_trails().await {
            Ok(summaries) => {
                debug!(count = summaries.len(), "loaded active trails");
                self.inner.update(|s| {
                    s.replace_active_trails(summaries);
                    s.clear_error();
                    s.set_loading(false);
                });
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to load active trails");
                Err(self.inner.fail(err))
            }
        }
    }

    /// Fetch a full trail and reconcile it into the store.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` if the store is disposed or the request fails.
    pub async fn load_trail(&self, trail_id: &TrailId) -> Result<Trail, TrailStoreError> {
        self.inner.ensure_live()?;
        self.inner.update(|s| s.set_loading(true));

        match self.inner.api.get_trail(trail_id).await {
            Ok(trail) => {
                let merged = self.inner.update(|s| {
                    s.merge_trail(trail, false);
                    s.set_loading(false);
                    s.trail(trail_id).cloned()
                });
                merged.flatten().ok_or(TrailStoreError::Disposed)
            }
            Err(err) => Err(self.inner.fail(err)),
        }
    }

    /// Fetch one module and reconcile it into its loaded trail.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` if the store is disposed or the request fails.
    pub async fn load_module(
        &self,
        trail_id: &TrailId,
        module_id: &ModuleId,
    ) -> Result<TrailModule, TrailStoreError> {
        self.inner.ensure_live()?;
        match self.inner.api.get_module(trail_id, module_id).await {
            Ok(module) => {
                let merged = self.inner.update(|s| {
                    if s.merge_module(trail_id, module.clone()) {
                        s.trail(trail_id).and_then(|t| t.module(module_id)).cloned()
                    } else {
                        None
                    }
                });
                Ok(merged.flatten().unwrap_or(module))
            }
            Err(err) => Err(self.inner.fail(err)),
        }
    }

    /// Fetch one lesson, reconciling it if its trail is loaded.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` if the store is disposed or the request fails.
    pub async fn load_lesson(&self, lesson_id: &LessonId) -> Result<Lesson, TrailStoreError> {
        self.inner.ensure_live()?;
        match self.inner.api.get_lesson(lesson_id).await {
            Ok(lesson) => {
                let merged = self.inner.update(|s| s.reconcile_lesson(lesson.clone()));
                Ok(merged.flatten().unwrap_or(lesson))
            }
            Err(err) => Err(self.inner.fail(err)),
        }
    }

    /// Request generation (or regeneration) and start watching it.
    ///
    /// A new trail beyond the active-trail limit is rejected before any
    /// request is sent. A second call for a trail that is already being
    /// watched replaces the earlier subscription.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` if the store is disposed, the quota is
    /// exhausted, or the request fails.
    pub async fn generate_trail(
        &self,
        request: GenerateTrailRequest,
    ) -> Result<TrailId, TrailStoreError> {
        self.inner.ensure_live()?;

        let snapshot = self.snapshot();
        let existing = snapshot.trail_for_language(&request.language_code).cloned();
        let limit = self.inner.config.max_active_trails;
        if existing.is_none() && snapshot.active_count() >= limit {
            info!(language = %request.language_code, limit, "trail quota reached");
            return Err(self.inner.fail(TrailApiError::QuotaExceeded { limit }));
        }

        let started = match self.inner.api.generate_trail(&request).await {
            Ok(started) => started,
            Err(err) => {
                warn!(language = %request.language_code, error = %err, "generation request failed");
                return Err(self.inner.fail(err));
            }
        };
        let trail_id = started.trail_id;
        let restart = request.force_regenerate && existing.as_ref() == Some(&trail_id);
        info!(%trail_id, language = %request.language_code, restart, "trail generation started");

        self.inner.update(|s| {
            s.begin_generation(&trail_id, &request.language_code, restart);
            s.clear_error();
        });
        self.inner.open_subscription(&trail_id, restart)?;
        Ok(trail_id)
    }

    /// Archive a trail, removing it from the active list right away.
    ///
    /// Any subscription for the trail is cancelled. If the service rejects the
    /// request the trail is put back where it was and `error` is set.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` if the store is disposed or the request fails.
    pub async fn archive_trail(&self, trail_id: &TrailId) -> Result<(), TrailStoreError> {
        self.inner.ensure_live()?;
        let cancelled = self.inner.close_subscription(trail_id);

        let rollback = self.inner.update(|s| s.take_for_archive(trail_id));
        match self.inner.api.archive_trail(trail_id).await {
            Ok(()) => {
                info!(%trail_id, "trail archived");
                Ok(())
            }
            Err(err) => {
                warn!(%trail_id, error = %err, "archive failed, restoring trail");
                let was_generating = rollback.as_ref().is_some_and(|r| r.generation.is_some());
                if let Some(rollback) = rollback {
                    self.inner.update(|s| s.restore_archived(trail_id, rollback));
                }
                if was_generating || cancelled {
                    self.inner.open_subscription(trail_id, false)?;
                }
                Err(self.inner.fail(err))
            }
        }
    }

    /// Record lesson progress optimistically, then reconcile with the service.
    ///
    /// Completion never reverts: `completed == false` keeps an existing
    /// completion. On failure the trail returns to its pre-update state.
    ///
    /// # Errors
    ///
    /// Returns `TrailStoreError` for invalid patches, lessons in pending
    /// modules, a disposed store, or a failed request.
    pub async fn update_lesson_progress(
        &self,
        lesson_id: &LessonId,
        patch: LessonProgressPatch,
    ) -> Result<Lesson, TrailStoreError> {
        self.inner.ensure_live()?;
        if let Err(err) = patch.validate() {
            return Err(self.inner.fail(err));
        }
        let now = self.inner.clock.now();

        let rollback = match self.inner.update(|s| s.apply_lesson_patch(lesson_id, &patch, now)) {
            Some(Ok(rollback)) => rollback,
            Some(Err(err)) => {
                self.inner.update(|s| s.set_error(&err));
                return Err(err);
            }
            None => return Err(TrailStoreError::Disposed),
        };

        match self.inner.api.update_lesson_progress(lesson_id, &patch).await {
            Ok(lesson) => {
                let merged = self.inner.update(|s| {
                    s.clear_error();
                    s.reconcile_lesson(lesson.clone())
                });
                Ok(merged.flatten().unwrap_or(lesson))
            }
            Err(err) => {
                warn!(%lesson_id, error = %err, "progress update failed, rolling back");
                if let Some(rollback) = rollback {
                    self.inner.update(|s| s.restore_lesson(rollback));
                }
                Err(self.inner.fail(err))
            }
        }
    }

    /// Cancel every subscription and stop publishing snapshots.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for TrailStore {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl StoreInner {
    fn subscriptions(&self) -> MutexGuard<'_, HashMap<TrailId, ActiveSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), TrailStoreError> {
        if self.is_disposed() {
            return Err(TrailStoreError::Disposed);
        }
        Ok(())
    }

    /// Publish a modified copy of the snapshot. `None` once disposed.
    fn update<R>(&self, change: impl FnOnce(&mut TrailSnapshot) -> R) -> Option<R> {
        if self.is_disposed() {
            return None;
        }
        let mut result = None;
        self.state.send_modify(|current| {
            let mut next = TrailSnapshot::clone(current);
            result = Some(change(&mut next));
            *current = Arc::new(next);
        });
        result
    }

    fn fail(&self, err: impl Into<TrailStoreError>) -> TrailStoreError {
        let err = err.into();
        self.update(|s| {
            s.set_error(&err);
            s.set_loading(false);
        });
        err
    }

    fn open_subscription(
        self: &Arc<Self>,
        trail_id: &TrailId,
        regenerating: bool,
    ) -> Result<(), TrailStoreError> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let callback_id = trail_id.clone();

        let superseded = {
            let mut subscriptions = self.subscriptions();
            // Checked under the lock so `dispose` cannot miss this entry.
            self.ensure_live()?;
            let handle = subscription::subscribe(
                Arc::clone(&self.api),
                trail_id.clone(),
                self.config.poll_interval,
                move |status| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_generation_status(&callback_id, epoch, status);
                    }
                },
            );
            subscriptions.insert(
                trail_id.clone(),
                ActiveSubscription {
                    epoch,
                    handle,
                    regenerating,
                },
            )
        };

        if let Some(previous) = superseded {
            debug!(%trail_id, "superseding generation subscription");
            previous.handle.cancel();
        }
        Ok(())
    }

    /// Remove and cancel the subscription for `trail_id`, if any.
    fn close_subscription(&self, trail_id: &TrailId) -> bool {
        let removed = self.subscriptions().remove(trail_id);
        match removed {
            Some(active) => {
                active.handle.cancel();
                true
            }
            None => false,
        }
    }

    fn on_generation_status(
        self: &Arc<Self>,
        trail_id: &TrailId,
        epoch: u64,
        status: TrailGenerationStatus,
    ) {
        if self.is_disposed() {
            return;
        }
        let subscriptions = self.subscriptions();
        let Some(active) = subscriptions.get(trail_id).filter(|a| a.epoch == epoch) else {
            debug!(%trail_id, "dropping status from superseded subscription");
            return;
        };
        let regenerating = active.regenerating;
        let complete = status.is_complete();
        self.update(|s| s.record_generation(trail_id, status));
        drop(subscriptions);

        if complete {
            let inner = Arc::clone(self);
            let trail_id = trail_id.clone();
            tokio::spawn(async move {
                inner.finish_generation(trail_id, epoch, regenerating).await;
            });
        }
    }

    async fn finish_generation(&self, trail_id: TrailId, epoch: u64, regenerating: bool) {
        let result = self.api.get_trail(&trail_id).await;

        let mut subscriptions = self.subscriptions();
        if self.is_disposed() {
            return;
        }
        match subscriptions.get(&trail_id) {
            Some(active) if active.epoch == epoch => {
                subscriptions.remove(&trail_id);
            }
            _ => return,
        }

        match result {
            Ok(trail) => {
                info!(%trail_id, status = ?trail.status(), "generated trail merged");
                self.update(|s| {
                    s.merge_trail(trail, regenerating);
                    s.clear_generation(&trail_id);
                });
            }
            Err(err) => {
                warn!(%trail_id, error = %err, "failed to fetch generated trail");
                self.update(|s| {
                    s.clear_generation(&trail_id);
                    s.set_error(&err);
                });
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<ActiveSubscription> =
            self.subscriptions().drain().map(|(_, active)| active).collect();
        for active in &drained {
            active.handle.cancel();
        }
        info!(cancelled = drained.len(), "trail store disposed");
    }
}
