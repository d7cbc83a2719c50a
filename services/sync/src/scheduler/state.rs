//! Single-flight and trigger state shared by the scheduler and the API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Whether a sync is running, and whether another one has been asked for.
///
/// At most one [`FlightGuard`] exists at a time. Triggers raised while a sync
/// runs collapse into a single pending trigger.
#[derive(Debug, Default)]
pub struct SyncState {
    in_progress: AtomicBool,
    pending: AtomicBool,
    notify: Notify,
    released: Notify,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a scheduled cycle or an ad-hoc sync is running.
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Ask for a cycle as soon as possible.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Mark a sync as started, unless one is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<FlightGuard> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlightGuard {
                state: Arc::clone(self),
            })
    }

    /// Wait until a trigger is pending, and consume it.
    pub(crate) async fn triggered(&self) {
        loop {
            if self.pending.swap(false, Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Put back a trigger that was consumed but could not be served yet.
    ///
    /// Does not wake the scheduler; pair with [`SyncState::idle`].
    pub(crate) fn requeue(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Wait until no sync is running.
    pub(crate) async fn idle(&self) {
        let released = self.released.notified();
        tokio::pin!(released);
        released.as_mut().enable();

        if !self.in_progress() {
            return;
        }
        released.await;
    }

    /// Drop any pending trigger; the cycle about to run satisfies it.
    pub(crate) fn clear_trigger(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}

/// Held for the duration of a sync. Dropping it clears the in-progress flag.
#[derive(Debug)]
pub struct FlightGuard {
    state: Arc<SyncState>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.state.in_progress.store(false, Ordering::SeqCst);
        self.state.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_flight() {
        let state = Arc::new(SyncState::new());
        assert!(!state.in_progress());

        let guard = state.try_begin().unwrap();
        assert!(state.in_progress());
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.in_progress());
        assert!(state.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_triggers_coalesce() {
        let state = SyncState::new();
        state.trigger();
        state.trigger();
        state.trigger();

        tokio::time::timeout(Duration::from_millis(100), state.triggered())
            .await
            .unwrap();

        let second = tokio::time::timeout(Duration::from_millis(100), state.triggered()).await;
        assert!(second.is_err(), "only one trigger should be pending");
    }

    #[tokio::test]
    async fn test_idle_waits_for_guard_release() {
        let state = Arc::new(SyncState::new());
        tokio::time::timeout(Duration::from_millis(100), state.idle())
            .await
            .unwrap();

        let guard = state.try_begin().unwrap();
        let waiter = tokio::spawn({
            let state = state.clone();
            async move { state.idle().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_requeued_trigger_is_pending() {
        let state = SyncState::new();
        state.trigger();
        state.triggered().await;
        state.requeue();

        tokio::time::timeout(Duration::from_millis(100), state.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleared_trigger_is_not_pending() {
        let state = SyncState::new();
        state.trigger();
        state.clear_trigger();

        let waited = tokio::time::timeout(Duration::from_millis(100), state.triggered()).await;
        assert!(waited.is_err());
    }
}
