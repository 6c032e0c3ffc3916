//! Failure store backends
//!
//! The failure store is the only source of truth for failure counters and
//! circuit records. This module provides:
//! - `FailureStore`: the remote key-value contract the engine relies on
//! - `MemoryStore`: thread-safe in-process store with TTLs and a movable clock
//! - `RedisStore`: shared store for multi-worker deployments (feature `redis`)

use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// Shared key-value store used by the circuit breaker engine
///
/// Implementations must make `incr_with_expiry` a single atomic operation so
/// concurrent workers never lose counts. No implementation may cache values
/// across calls.
#[async_trait]
pub trait FailureStore: Send + Sync + std::fmt::Debug {
    /// Atomically increment a counter, starting from zero when absent
    ///
    /// When the increment creates the key (result is 1) the key expires after `ttl`.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value without expiry
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// List live keys starting with `prefix`
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Current time as seen by the store
    ///
    /// Every worker computes cooldowns against the same clock, which keeps
    /// `openedAt` arithmetic immune to skew between worker hosts.
    async fn now(&self) -> Result<DateTime<Utc>, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Thread-safe in-memory failure store
///
/// Honours TTLs against its own clock, which tests can move forward with
/// [`MemoryStore::advance`]. It can also simulate an outage or a slow link.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    /// Offset added to the wall clock
    clock_offset: Mutex<chrono::Duration>,
    unavailable: AtomicBool,
    deletes_fail: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the store clock forward
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut offset = self.clock_offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }

    /// Make every operation fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `delete` fail, leaving reads and writes working
    pub fn set_delete_failure(&self, fail: bool) {
        self.deletes_fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = latency;
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock();
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Private helper methods

    fn clock(&self) -> DateTime<Utc> {
        let offset = *self.clock_offset.lock().unwrap_or_else(|p| p.into_inner());
        Utc::now() + offset
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FailureStore for MemoryStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.round_trip().await?;
        let now = self.clock();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());

        let current = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                entry.value.parse::<u64>().map_err(|_| StoreError::Corrupt {
                    key: key.to_string(),
                    value: entry.value.clone(),
                })?
            }
            _ => 0,
        };
        let next = current + 1;

        let expires_at = if next == 1 {
            chrono::Duration::from_std(ttl).ok().map(|ttl| now + ttl)
        } else {
            entries.get(key).and_then(|e| e.expires_at)
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );

        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.round_trip().await?;
        let now = self.clock();
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.round_trip().await?;
        if self.deletes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store rejected DEL".to_string()));
        }
        let now = self.clock();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.round_trip().await?;
        let now = self.clock();
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        self.round_trip().await?;
        Ok(self.clock())
    }
}
