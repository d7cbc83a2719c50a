//! In-memory session cache for testing and development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CacheError, ScanPage, SessionCache};

const DEFAULT_PAGE_SIZE: usize = 100;

/// In-memory session cache with paginated scans.
///
/// TTLs are not modelled; compare-and-set has the same semantics as the Redis
/// implementation.
pub struct MemorySessionCache {
    entries: Mutex<BTreeMap<String, String>>,
    page_size: usize,
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty cache that returns at most `page_size` keys per scan.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Store a raw value, as the session-issuing service would.
    pub async fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }

    /// Read a raw value without going through the trait.
    pub async fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(current) if current == expected => {
                *current = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan(&self, cursor: u64) -> Result<ScanPage, CacheError> {
        let entries = self.entries.lock().await;
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let keys: Vec<String> = entries
            .keys()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();

        let next = start + keys.len();
        let cursor = if keys.is_empty() || next >= entries.len() {
            0
        } else {
            next as u64
        };

        Ok(ScanPage { cursor, keys })
    }
}
