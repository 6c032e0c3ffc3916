//! Callback system for circuit transitions
//!
//! Callbacks are fire-and-forget: a panicking callback is caught and logged so
//! alert delivery can never affect a routing decision. The consumer runs them
//! on tokio's blocking pool, so a callback may block (a synchronous HTTP
//! pager, say) without stalling job routing. `JobConsumer::wait_for_hooks`
//! waits for the ones already fired.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

/// Payload of the alert fired when a circuit opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitAlert {
    pub job_type: String,
    pub error_code: String,
    pub failure_count: u64,
    pub opened_at: DateTime<Utc>,
}

type AlertFn = Arc<dyn Fn(&CircuitAlert) + Send + Sync>;
type JobTypeFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit transitions
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<AlertFn>,
    pub on_close: Option<JobTypeFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the open alert; may run more than once per episode under races
    pub fn trigger_open(&self, alert: &CircuitAlert) {
        if let Some(ref callback) = self.on_open
            && catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err()
        {
            warn!(
                job_type = %alert.job_type,
                error_code = %alert.error_code,
                "Circuit open alert hook panicked"
            );
        }
    }

    pub fn trigger_close(&self, job_type: &str) {
        if let Some(ref callback) = self.on_close
            && catch_unwind(AssertUnwindSafe(|| callback(job_type))).is_err()
        {
            warn!(job_type = %job_type, "Circuit close hook panicked");
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}
