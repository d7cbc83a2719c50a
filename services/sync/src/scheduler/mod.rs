//! Sync scheduling.
//!
//! The scheduler is responsible for:
//! - Waking on the sync interval or a manual trigger
//! - Running one cycle at a time across every configured host
//! - Bounding each cycle, and cancelling it when the bound is exceeded
//! - Logging the aggregate and per-host results

mod cycle;
mod state;
mod worker;

pub use cycle::SyncCoordinator;
pub use state::{FlightGuard, SyncState};
pub use worker::SchedulerWorker;
