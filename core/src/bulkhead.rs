//! Per-job-type bulkhead
//!
//! Caps how many deliveries of one job type a consumer works on at once, which
//! bounds how many jobs race through a circuit that is about to open. Breaker
//! correctness does not depend on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-flight limiter keyed by job type
#[derive(Debug)]
pub struct JobTypeBulkhead {
    limit: usize,
    in_flight: Mutex<HashMap<String, usize>>,
}

impl JobTypeBulkhead {
    /// Create a bulkhead admitting `limit` concurrent jobs per job type
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "Bulkhead limit must be greater than 0");
        Self {
            limit,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take a slot for `job_type` without waiting
    pub fn try_acquire(self: &Arc<Self>, job_type: &str) -> Option<BulkheadPermit> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        let current = in_flight.entry(job_type.to_string()).or_insert(0);
        if *current >= self.limit {
            return None;
        }
        *current += 1;

        Some(BulkheadPermit {
            bulkhead: Arc::clone(self),
            job_type: job_type.to_string(),
        })
    }

    pub fn in_flight(&self, job_type: &str) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        in_flight.get(job_type).copied().unwrap_or(0)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn release(&self, job_type: &str) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(current) = in_flight.get_mut(job_type) {
            *current = current.saturating_sub(1);
            if *current == 0 {
                in_flight.remove(job_type);
            }
        }
    }
}

/// Slot held while one delivery is processed; released on drop
#[derive(Debug)]
pub struct BulkheadPermit {
    bulkhead: Arc<JobTypeBulkhead>,
    job_type: String,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.release(&self.job_type);
    }
}
