//! Count of outstanding vote operations and the busy signal derived from it.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::sync::lock;

#[derive(Debug, Default)]
struct TrackerState {
    count: u32,
    last_changed: Option<Instant>,
    /// Bumped by every reset; guards from an earlier epoch no longer count.
    epoch: u64,
}

/// Tracks vote operations so bulk reloads can wait for a quiet moment.
///
/// The engine counts as busy while any operation is outstanding and for a
/// quiet interval after the count last changed. That interval is a
/// heuristic: a server response that lags past it can still arrive after a
/// bulk reload has started.
#[derive(Debug)]
pub struct PendingTracker {
    state: Mutex<TrackerState>,
    quiet_interval: Duration,
    idle: Notify,
}

impl PendingTracker {
    pub fn new(quiet_interval: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            quiet_interval,
            idle: Notify::new(),
        }
    }

    pub fn begin(&self) {
        self.begin_in_epoch();
    }

    fn begin_in_epoch(&self) -> u64 {
        let mut state = lock(&self.state);
        state.count += 1;
        state.last_changed = Some(Instant::now());
        tracing::debug!(pending = state.count, "vote operation started");
        state.epoch
    }

    /// Never lets the count go below zero.
    pub fn end(&self) {
        self.finish(None);
    }

    fn finish(&self, epoch: Option<u64>) {
        let reached_zero = {
            let mut state = lock(&self.state);
            if epoch.is_some_and(|epoch| epoch != state.epoch) {
                tracing::debug!("operation begun before a reset finished; not counted");
                return;
            }
            if state.count == 0 {
                tracing::warn!("pending vote count would go negative; clamping at zero");
            } else {
                state.count -= 1;
            }
            state.last_changed = Some(Instant::now());
            tracing::debug!(pending = state.count, "vote operation finished");
            state.count == 0
        };
        if reached_zero {
            self.idle.notify_waiters();
        }
    }

    /// Begin an operation that ends when the guard drops.
    pub fn guard(self: &Arc<Self>) -> PendingGuard {
        let epoch = self.begin_in_epoch();
        PendingGuard {
            tracker: Arc::clone(self),
            epoch,
        }
    }

    pub fn count(&self) -> u32 {
        lock(&self.state).count
    }

    pub fn quiet_interval(&self) -> Duration {
        self.quiet_interval
    }

    pub fn is_busy(&self) -> bool {
        self.is_busy_at(Instant::now())
    }

    pub fn is_busy_at(&self, now: Instant) -> bool {
        let state = lock(&self.state);
        if state.count > 0 {
            return true;
        }
        state
            .last_changed
            .is_some_and(|changed| now.saturating_duration_since(changed) < self.quiet_interval)
    }

    /// Resolves the next time the count drops to zero.
    pub async fn idle(&self) {
        self.idle.notified().await;
    }

    pub(crate) fn reset(&self) {
        {
            let mut state = lock(&self.state);
            let epoch = state.epoch.wrapping_add(1);
            *state = TrackerState {
                epoch,
                ..TrackerState::default()
            };
        }
        self.idle.notify_waiters();
    }
}

/// Ends its operation on drop, whatever path the operation took.
#[derive(Debug)]
pub struct PendingGuard {
    tracker: Arc<PendingTracker>,
    epoch: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.tracker.finish(Some(self.epoch));
    }
}
