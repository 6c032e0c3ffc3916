//! Infrastructure health as seen by a consumer
//!
//! Counts consecutive store or transport failures. After `degraded_after` of
//! them in a row the status flips to degraded; the next successful round-trip
//! flips it back. Orchestration can poll [`HealthTracker::status`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum HealthStatus {
    Healthy,
    #[serde(rename_all = "camelCase")]
    Degraded {
        consecutive_failures: u32,
        last_error: String,
        since: DateTime<Utc>,
    },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug)]
struct LastFailure {
    error: String,
    first_seen: DateTime<Utc>,
}

/// Consecutive infrastructure failure counter
#[derive(Debug)]
pub struct HealthTracker {
    degraded_after: u32,
    consecutive_failures: AtomicU32,
    last_failure: Mutex<Option<LastFailure>>,
}

impl HealthTracker {
    pub fn new(degraded_after: u32) -> Self {
        Self {
            degraded_after: degraded_after.max(1),
            consecutive_failures: AtomicU32::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn record_success(&self) {
        if self.consecutive_failures.swap(0, Ordering::SeqCst) >= self.degraded_after {
            tracing::info!("Infrastructure recovered");
        }
        *self.lock() = None;
    }

    pub fn record_failure(&self, error: &dyn std::error::Error) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut last = self.lock();
            let first_seen = last.as_ref().map_or_else(Utc::now, |l| l.first_seen);
            *last = Some(LastFailure {
                error: error.to_string(),
                first_seen,
            });
        }
        if failures == self.degraded_after {
            tracing::error!(
                consecutive_failures = failures,
                error = %error,
                "Infrastructure degraded"
            );
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> HealthStatus {
        let failures = self.consecutive_failures();
        if failures < self.degraded_after {
            return HealthStatus::Healthy;
        }
        let last = self.lock();
        let (last_error, since) = last
            .as_ref()
            .map(|l| (l.error.clone(), l.first_seen))
            .unwrap_or_else(|| (String::new(), Utc::now()));
        HealthStatus::Degraded {
            consecutive_failures: failures,
            last_error,
            since,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<LastFailure>> {
        self.last_failure.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;

    #[test]
    fn test_degrades_after_consecutive_failures() {
        let health = HealthTracker::new(3);
        let err = StoreError::Unavailable("connection refused".into());

        health.record_failure(&err);
        health.record_failure(&err);
        assert!(health.status().is_healthy());

        health.record_failure(&err);
        match health.status() {
            HealthStatus::Degraded {
                consecutive_failures,
                last_error,
                ..
            } => {
                assert_eq!(consecutive_failures, 3);
                assert_eq!(last_error, "store unavailable: connection refused");
            }
            HealthStatus::Healthy => panic!("expected degraded"),
        }
    }

    #[test]
    fn test_success_resets() {
        let health = HealthTracker::new(1);
        health.record_failure(&StoreError::Unavailable("down".into()));
        assert!(!health.status().is_healthy());

        health.record_success();
        assert!(health.status().is_healthy());
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(HealthStatus::Healthy).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
