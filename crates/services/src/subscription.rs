//! Polling subscription to a trail's generation status.
//!
//! `subscribe` spawns one task per trail that checks status immediately and
//! then on a fixed interval, handing every received status to the callback
//! until generation reports 100% or the returned handle is cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trail_core::model::{TrailGenerationStatus, TrailId};

use crate::api::TrailApi;

#[derive(Debug)]
struct HandleInner {
    trail_id: TrailId,
    token: CancellationToken,
    // Held while a status is being delivered; `true` once no more may be.
    stopped: Mutex<bool>,
}

/// Cancellation handle for a generation status subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    fn new(trail_id: TrailId) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                trail_id,
                token: CancellationToken::new(),
                stopped: Mutex::new(false),
            }),
        }
    }

    fn stopped(&self) -> MutexGuard<'_, bool> {
        self.inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn trail_id(&self) -> &TrailId {
        &self.inner.trail_id
    }

    /// Stop polling. Idempotent, and safe after natural termination.
    ///
    /// Once this returns no callback is running and none will run, including
    /// for a status check that was already in flight. Must not be called from
    /// inside this subscription's own callback.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        let mut stopped = self.stopped();
        if !*stopped {
            debug!(trail_id = %self.inner.trail_id, "generation subscription cancelled");
        }
        *stopped = true;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// True once the subscription has stopped for any reason.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.stopped()
    }

    /// Run `deliver` unless the subscription has stopped. Returns whether it ran.
    fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let stopped = self.stopped();
        if *stopped {
            return false;
        }
        deliver();
        true
    }

    fn finish(&self) {
        *self.stopped() = true;
    }
}

/// Start watching `trail_id`'s generation, calling `on_update` with every
/// received status in order.
///
/// Identical consecutive statuses are all delivered. Failed status checks are
/// logged and retried on the next tick; a status carrying `error_message` is
/// delivered and polling continues. Must be called within a tokio runtime.
pub fn subscribe<F>(
    api: Arc<dyn TrailApi>,
    trail_id: TrailId,
    interval: Duration,
    on_update: F,
) -> SubscriptionHandle
where
    F: FnMut(TrailGenerationStatus) + Send + 'static,
{
    let handle = SubscriptionHandle::new(trail_id);
    tokio::spawn(poll(api, handle.clone(), interval, on_update));
    handle
}

async fn poll<F>(
    api: Arc<dyn TrailApi>,
    handle: SubscriptionHandle,
    interval: Duration,
    mut on_update: F,
) where
    F: FnMut(TrailGenerationStatus) + Send + 'static,
{
    let token = handle.inner.token.clone();
    let trail_id = handle.trail_id().clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(%trail_id, ?interval, "watching trail generation");

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => return,
            result = api.generation_status(&trail_id) => result,
        };

        let status = match result {
            Ok(status) => status,
            Err(err) if err.is_transient() => {
                debug!(%trail_id, error = %err, "generation status check failed, retrying");
                continue;
            }
            Err(err) => {
                warn!(%trail_id, error = %err, "generation status check rejected, retrying");
                continue;
            }
        };

        if let Some(message) = &status.error_message {
            warn!(%trail_id, %message, "trail generation reported an error");
        }

        let complete = status.is_complete();
        if !handle.deliver(|| on_update(status)) {
            return;
        }
        if complete {
            handle.finish();
            info!(%trail_id, "trail generation complete");
            return;
        }
    }
}
