//! Redis-backed failure store
//!
//! Uses a `ConnectionManager`, which reconnects transparently, so a Redis
//! restart shows up as a handful of failed calls rather than a dead worker.

use crate::errors::StoreError;
use crate::storage::FailureStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

/// Number of keys requested per `SCAN` round trip
const SCAN_BATCH: usize = 100;

/// INCR and the first-increment EXPIRE as one server-side step
///
/// A client that gives up between the two commands would otherwise leave a
/// counter without expiry.
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Failure store shared by every worker through Redis
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    incr_script: redis::Script,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected failure store to redis");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            incr_script: redis::Script::new(INCR_WITH_EXPIRY),
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

#[async_trait]
impl FailureStore for RedisStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        let count: u64 = self
            .incr_script
            .key(key)
            .arg(seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        let mut conn = self.connection.clone();
        let (secs, micros): (i64, u32) = redis::cmd("TIME").query_async(&mut conn).await?;
        DateTime::from_timestamp(secs, micros.saturating_mul(1000)).ok_or_else(|| {
            StoreError::Corrupt {
                key: "TIME".to_string(),
                value: format!("{}.{}", secs, micros),
            }
        })
    }
}

/// Escape the glob metacharacters Redis `MATCH` understands
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("jobgate:failures:email:"), "jobgate:failures:email:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running redis (set REDIS_URL)"]
    async fn test_redis_store_counter_lifecycle() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let prefix = format!("jobgate-test:{}:", uuid::Uuid::new_v4());
        let key = format!("{}API_TIMEOUT", prefix);

        assert_eq!(
            store
                .incr_with_expiry(&key, Duration::from_secs(30))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .incr_with_expiry(&key, Duration::from_secs(30))
                .await
                .unwrap(),
            2
        );

        let keys = store.keys_with_prefix(&prefix).await.unwrap();
        assert_eq!(keys, vec![key.clone()]);

        assert_eq!(store.delete(&keys).await.unwrap(), 1);
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running redis (set REDIS_URL)"]
    async fn test_redis_counter_expiry_set_once() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("jobgate-test:{}:API_TIMEOUT", uuid::Uuid::new_v4());
        let mut conn = store.connection.clone();

        store
            .incr_with_expiry(&key, Duration::from_secs(30))
            .await
            .unwrap();
        let first: i64 = conn.ttl(&key).await.unwrap();
        assert!((1..=30).contains(&first), "ttl after first increment: {}", first);

        store
            .incr_with_expiry(&key, Duration::from_secs(300))
            .await
            .unwrap();
        let second: i64 = conn.ttl(&key).await.unwrap();
        assert!(second <= 30, "later increments must not extend the ttl");

        store.delete(&[key]).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis (set REDIS_URL)"]
    async fn test_redis_store_time() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let server_now = store.now().await.unwrap();
        let drift = (Utc::now() - server_now).num_seconds().abs();
        assert!(drift < 60, "redis clock drift too large: {}s", drift);
    }
}
