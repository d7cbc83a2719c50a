//! # vmsync-inventory
//!
//! Shared data model for the vmsync service.
//!
//! ## Design Principles
//!
//! - A VM is identified by its hypervisor UUID; the display name is only a
//!   fallback identity when no UUID is available
//! - Provider sentinels ("unknown", "N/A") never leak past the parsing boundary;
//!   they become `None`
//! - Orphan state transitions go through [`VmRecord::mark_orphaned`] and
//!   [`VmRecord::reactivate`] so `orphan_since` is only ever set on the
//!   active → orphaned edge and cleared on the way back
//! - Name collections are sets internally and ordered sequences on the wire
//!
//! ## Lifecycle
//!
//! ```text
//!            absent from host            observed again
//!   Active ───────────────────▶ Orphaned ───────────────▶ Active
//! ```
//!
//! Records are never deleted; removal is represented only by the orphan flag.

mod error;
mod events;
mod record;
mod result;
mod session;
mod types;

pub use error::InventoryError;
pub use events::{OrphanEntry, RenameEvent};
pub use record::{LiveVm, VmRecord};
pub use result::{CycleResult, SelectiveSyncResult, WritePath};
pub use session::Session;
pub use types::{known_value, PowerState, VmIdentity, VmUuid};
