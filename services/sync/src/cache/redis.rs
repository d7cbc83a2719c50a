//! Redis-backed session cache.

use std::fmt;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::{debug, info};

use super::{CacheError, ScanPage, SessionCache};

/// Compare-and-set that keeps the existing TTL.
///
/// KEYS[1] = session key, ARGV[1] = expected value, ARGV[2] = new value.
fn compare_and_set_script() -> Script {
    Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if current == false or current ~= ARGV[1] then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
        return 1
        "#,
    )
}

/// Session cache on a Redis server.
#[derive(Clone)]
pub struct RedisSessionCache {
    conn: ConnectionManager,
    scan_count: usize,
    key_pattern: String,
}

impl fmt::Debug for RedisSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSessionCache")
            .field("connection", &"ConnectionManager")
            .field("scan_count", &self.scan_count)
            .field("key_pattern", &self.key_pattern)
            .finish()
    }
}

impl RedisSessionCache {
    /// Connect to Redis at `redis_url`.
    pub async fn connect(
        redis_url: &str,
        scan_count: usize,
        key_pattern: &str,
    ) -> Result<Self, CacheError> {
        info!(scan_count, key_pattern, "Connecting to session cache");

        let client = redis::Client::open(redis_url).map_err(CacheError::Connect)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(CacheError::Connect)?;

        info!("Session cache connection established");

        Ok(Self {
            conn,
            scan_count,
            key_pattern: key_pattern.to_string(),
        })
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(CacheError::Command)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let swapped = compare_and_set_script()
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(CacheError::Command)?;

        debug!(key, swapped = swapped == 1, "Session compare-and-set");
        Ok(swapped == 1)
    }

    async fn scan(&self, cursor: u64) -> Result<ScanPage, CacheError> {
        let mut conn = self.conn.clone();
        let (cursor, keys) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&self.key_pattern)
            .arg("COUNT")
            .arg(self.scan_count)
            .query_async::<(u64, Vec<String>)>(&mut conn)
            .await
            .map_err(CacheError::Command)?;

        Ok(ScanPage { cursor, keys })
    }
}
