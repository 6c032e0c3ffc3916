//! Job messages and the envelopes emitted to downstream channels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of work travelling through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    /// Stable identifier of the logical job across retries
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Partition key for circuit breakers
    pub job_type: String,
    /// Executor input, opaque to the engine
    #[serde(default)]
    pub payload: serde_json::Value,
    pub metadata: JobMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    /// Set once at submission
    pub submitted_at: DateTime<Utc>,
    /// Number of retry hops taken so far
    #[serde(default)]
    pub attempt_count: u32,
}

impl JobMessage {
    /// Create a fresh job as the submission API would
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            metadata: JobMetadata {
                submitted_at: Utc::now(),
                attempt_count: 0,
            },
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.metadata.attempt_count
    }

    /// Copy of this job for its next retry hop
    ///
    /// Only `attemptCount` changes; payload and `submittedAt` are carried over.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.metadata.attempt_count = self.metadata.attempt_count.saturating_add(1);
        next
    }

    /// Decode a job from a delivery body, rejecting an empty `jobType`
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let job: JobMessage = serde_json::from_slice(body)?;
        if job.job_type.trim().is_empty() {
            return Err(serde::de::Error::custom("jobType must not be empty"));
        }
        Ok(job)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Message emitted to the terminal-failure channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineMessage {
    #[serde(flatten)]
    pub job: JobMessage,
    pub quarantine_reason: String,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineMessage {
    pub fn new(job: JobMessage, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            job,
            quarantine_reason: reason.into(),
            quarantined_at: at,
        }
    }
}
