//! Session cache access.
//!
//! Sessions are JSON blobs owned by another service. vmsync only reads them,
//! rewrites their membership sets and writes them back with a
//! compare-and-set that keeps the key's TTL, so a concurrent writer is
//! detected instead of silently overwritten.

mod memory;
mod redis;

pub use self::memory::MemorySessionCache;
pub use self::redis::RedisSessionCache;

use async_trait::async_trait;
use thiserror::Error;

/// Session cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to the cache.
    #[error("failed to connect to session cache: {0}")]
    Connect(#[source] ::redis::RedisError),

    /// A cache command failed.
    #[error("session cache command failed: {0}")]
    Command(#[source] ::redis::RedisError),
}

/// One page of a key scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next page; `0` once the scan has wrapped around.
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Key/value cache holding session blobs.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Read a raw value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Replace `key` with `value` only if it currently holds `expected`.
    ///
    /// The key's TTL is preserved. Returns false when the value changed or
    /// the key expired since it was read.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError>;

    /// Fetch one page of keys starting at `cursor` (`0` starts a new scan).
    async fn scan(&self, cursor: u64) -> Result<ScanPage, CacheError>;
}

/// Drive a scan until the cursor returns to the start.
///
/// Keys may be reported more than once by the backend; the result is
/// de-duplicated.
pub async fn scan_all_keys(cache: &dyn SessionCache) -> Result<Vec<String>, CacheError> {
    let mut keys = Vec::new();
    let mut cursor = 0;

    loop {
        let page = cache.scan(cursor).await?;
        keys.extend(page.keys);
        if page.cursor == 0 {
            break;
        }
        cursor = page.cursor;
    }

    keys.sort();
    keys.dedup();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_all_keys_walks_every_page() {
        let cache = MemorySessionCache::with_page_size(2);
        for key in ["s1", "s2", "s3", "s4", "s5"] {
            cache.insert(key, "{}").await;
        }

        let keys = scan_all_keys(&cache).await.unwrap();
        assert_eq!(keys, vec!["s1", "s2", "s3", "s4", "s5"]);
    }

    #[tokio::test]
    async fn test_scan_all_keys_empty() {
        let cache = MemorySessionCache::new();
        assert!(scan_all_keys(&cache).await.unwrap().is_empty());
    }
}
