//! Application state shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::{SyncCoordinator, SyncState};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    sync: Arc<SyncState>,
    coordinator: Arc<SyncCoordinator>,
    sync_timeout: Duration,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        sync: Arc<SyncState>,
        coordinator: Arc<SyncCoordinator>,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                sync,
                coordinator,
                sync_timeout,
            }),
        }
    }

    /// Single-flight and trigger state, shared with the scheduler.
    pub fn sync(&self) -> &Arc<SyncState> {
        &self.inner.sync
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }

    /// Upper bound on an ad-hoc sync.
    pub fn sync_timeout(&self) -> Duration {
        self.inner.sync_timeout
    }
}
