//! Session cache propagation.
//!
//! Pushes the deltas of a reconciliation cycle into every session blob:
//! orphaned VMs leave `vms` for `orphans`, reactivated VMs move back, and
//! renamed VMs are replaced in place.
//!
//! Each session is rewritten with a read-modify-compare-and-set loop. When
//! another writer changes the blob in between, the delta is re-applied to the
//! fresh value, up to [`MAX_CAS_ATTEMPTS`] times.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use vmsync_inventory::{OrphanEntry, RenameEvent, Session};

use crate::cache::{scan_all_keys, CacheError, SessionCache};

/// Attempts per session before a contended rewrite is given up.
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// Counters for one propagation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PropagationStats {
    /// Session keys visited.
    pub scanned: u32,

    /// Sessions rewritten.
    pub modified: u32,

    /// Sessions that could not be read or rewritten.
    pub failed: u32,
}

/// Result of propagating renames.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenamePropagation {
    pub stats: PropagationStats,

    /// Renames that matched at least one session.
    pub applied: Vec<RenameEvent>,
}

#[derive(Debug, thiserror::Error)]
enum RewriteError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session kept changing, gave up after retries")]
    Contended,
}

/// Applies reconciliation deltas to session blobs.
pub struct Propagator {
    cache: Arc<dyn SessionCache>,
}

impl Propagator {
    pub fn new(cache: Arc<dyn SessionCache>) -> Self {
        Self { cache }
    }

    /// Move orphaned VMs out of every session's visible set.
    pub async fn propagate_orphans(
        &self,
        orphans: &[OrphanEntry],
    ) -> Result<PropagationStats, CacheError> {
        if orphans.is_empty() {
            return Ok(PropagationStats::default());
        }

        let (stats, _) = self
            .rewrite_all("orphans", |session| {
                session.apply_orphans(orphans).then_some(())
            })
            .await?;
        Ok(stats)
    }

    /// Move reactivated VMs from every session's orphan list back to `vms`.
    pub async fn propagate_reactivations(
        &self,
        names: &[String],
    ) -> Result<PropagationStats, CacheError> {
        if names.is_empty() {
            return Ok(PropagationStats::default());
        }

        let names: BTreeSet<String> = names.iter().cloned().collect();
        let (stats, _) = self
            .rewrite_all("reactivations", |session| {
                session.apply_reactivations(&names).then_some(())
            })
            .await?;
        Ok(stats)
    }

    /// Replace renamed VMs in every session.
    pub async fn propagate_renames(
        &self,
        renames: &[RenameEvent],
    ) -> Result<RenamePropagation, CacheError> {
        if renames.is_empty() {
            return Ok(RenamePropagation::default());
        }

        let (stats, applied) = self
            .rewrite_all("renames", |session| {
                let applied = session.apply_renames(renames);
                (!applied.is_empty()).then_some(applied)
            })
            .await?;

        let applied: BTreeSet<RenameEvent> = applied.into_iter().flatten().collect();
        Ok(RenamePropagation {
            stats,
            applied: applied.into_iter().collect(),
        })
    }

    /// Rewrite every session for which `apply` reports a change.
    ///
    /// Only a failed key scan is an error; per-session failures are counted.
    async fn rewrite_all<T, F>(
        &self,
        delta: &'static str,
        mut apply: F,
    ) -> Result<(PropagationStats, Vec<T>), CacheError>
    where
        F: FnMut(&mut Session) -> Option<T>,
    {
        let keys = scan_all_keys(self.cache.as_ref()).await?;
        let mut stats = PropagationStats::default();
        let mut payloads = Vec::new();

        for key in &keys {
            stats.scanned += 1;
            match self.rewrite_session(key, &mut apply).await {
                Ok(Some(payload)) => {
                    stats.modified += 1;
                    payloads.push(payload);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, delta, error = %e, "Failed to update session");
                    stats.failed += 1;
                }
            }
        }

        info!(
            delta,
            scanned = stats.scanned,
            modified = stats.modified,
            failed = stats.failed,
            "Propagated deltas to sessions"
        );

        Ok((stats, payloads))
    }

    /// Returns `None` when the session vanished, is not a session, or did not
    /// need to change.
    async fn rewrite_session<T, F>(&self, key: &str, apply: &mut F) -> Result<Option<T>, RewriteError>
    where
        F: FnMut(&mut Session) -> Option<T>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(raw) = self.cache.get(key).await? else {
                debug!(key, "Session expired before update");
                return Ok(None);
            };

            let mut session = match Session::decode(&raw) {
                Ok(session) => session,
                Err(e) => {
                    debug!(key, error = %e, "Skipping non-session value");
                    return Ok(None);
                }
            };

            let Some(payload) = apply(&mut session) else {
                return Ok(None);
            };

            let encoded = session.encode()?;
            if self.cache.compare_and_set(key, &raw, &encoded).await? {
                return Ok(Some(payload));
            }
            debug!(key, attempt, "Session changed concurrently, retrying");
        }

        Err(RewriteError::Contended)
    }
}
