//! Job executor contract and the executors shipped with the crate
//!
//! An executor never fails with an error: every failure path is an
//! [`ExecutionOutcome::Failure`] carrying an [`ErrorCode`]. Panics and
//! timeouts are folded into `INTERNAL_ERROR` by [`guarded_execute`], so the
//! routing pipeline always receives a typed outcome.

use crate::job::JobMessage;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Classification of a failed execution
///
/// Failure counters are kept per `(job type, error code)`, so the code is the
/// unit in which the breaker reasons about a failure mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(Cow<'static, str>);

impl ErrorCode {
    /// Synthetic outcome for jobs suppressed by an open circuit
    pub const CIRCUIT_OPEN: ErrorCode = ErrorCode(Cow::Borrowed("CIRCUIT_OPEN"));
    /// Executor fault that escaped the typed outcome (panic, timeout)
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(Cow::Borrowed("INTERNAL_ERROR"));

    pub fn new(code: impl Into<String>) -> Self {
        Self(Cow::Owned(code.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

/// Result of executing one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure { error_code: ErrorCode, message: String },
}

impl ExecutionOutcome {
    pub fn failure(error_code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// Outcome synthesized when an open circuit suppresses execution
    pub fn circuit_open() -> Self {
        Self::failure(ErrorCode::CIRCUIT_OPEN, "circuit breaker is open")
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    pub fn error_code(&self) -> Option<&ErrorCode> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::Failure { error_code, .. } => Some(error_code),
        }
    }
}

/// Performs the unit of work for one job
///
/// Implementations must report every failure as an outcome. Given fixed
/// inputs a test executor must be deterministic.
#[async_trait]
pub trait JobExecutor: Send + Sync + fmt::Debug {
    async fn execute(&self, job: &JobMessage) -> ExecutionOutcome;
}

/// Run an executor, folding panics and an optional timeout into `INTERNAL_ERROR`
pub async fn guarded_execute(
    executor: &dyn JobExecutor,
    job: &JobMessage,
    timeout: Option<Duration>,
) -> ExecutionOutcome {
    let run = AssertUnwindSafe(executor.execute(job)).catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => {
                return ExecutionOutcome::failure(
                    ErrorCode::INTERNAL_ERROR,
                    format!("executor timed out after {:?}", limit),
                );
            }
        },
        None => run.await,
    };

    result.unwrap_or_else(|panic| {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ExecutionOutcome::failure(
            ErrorCode::INTERNAL_ERROR,
            format!("executor panicked: {}", detail),
        )
    })
}

/// Deterministic executor driven by per-job-type scripts
///
/// Each job type has a queue of outcomes consumed in order; once the queue is
/// empty the job type's fallback outcome is returned (success by default).
/// Invocations are counted so tests can assert the executor was bypassed.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<ExecutionOutcome>>>,
    fallbacks: Mutex<HashMap<String, ExecutionOutcome>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append outcomes to a job type's script
    pub fn script<I>(self, job_type: &str, outcomes: I) -> Self
    where
        I: IntoIterator<Item = ExecutionOutcome>,
    {
        self.push(job_type, outcomes);
        self
    }

    /// Make every unscripted execution of `job_type` fail with `error_code`
    pub fn fail_always(self, job_type: &str, error_code: &str) -> Self {
        self.set_fallback(
            job_type,
            ExecutionOutcome::failure(error_code, format!("{} (scripted)", error_code)),
        );
        self
    }

    /// Append outcomes to a script after construction
    pub fn push<I>(&self, job_type: &str, outcomes: I)
    where
        I: IntoIterator<Item = ExecutionOutcome>,
    {
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        scripts
            .entry(job_type.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Replace the outcome returned once a job type's script runs out
    pub fn set_fallback(&self, job_type: &str, outcome: ExecutionOutcome) {
        let mut fallbacks = self.fallbacks.lock().unwrap_or_else(|p| p.into_inner());
        fallbacks.insert(job_type.to_string(), outcome);
    }

    /// Total number of executions across all job types
    pub fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Number of executions of one job type
    pub fn calls_for(&self, job_type: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        calls.get(job_type).copied().unwrap_or(0)
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, job: &JobMessage) -> ExecutionOutcome {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
            *calls.entry(job.job_type.clone()).or_default() += 1;
        }

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
            scripts
                .get_mut(&job.job_type)
                .and_then(|queue| queue.pop_front())
        };

        scripted.unwrap_or_else(|| {
            let fallbacks = self.fallbacks.lock().unwrap_or_else(|p| p.into_inner());
            fallbacks
                .get(&job.job_type)
                .cloned()
                .unwrap_or(ExecutionOutcome::Success)
        })
    }
}

/// Failure profile of one job type in a [`SimulatedExecutor`]
#[derive(Debug, Clone)]
pub struct FailureProfile {
    /// Probability in 0..=1 that an execution fails
    pub failure_rate: f64,
    pub error_code: ErrorCode,
    pub message: String,
}

/// Executor that simulates a flaky dependency per job type
///
/// Randomness comes from a seeded generator, so a given seed and job sequence
/// always yields the same outcomes.
#[derive(Debug)]
pub struct SimulatedExecutor {
    profiles: HashMap<String, FailureProfile>,
    latency: Duration,
    rng: Mutex<fastrand::Rng>,
}

impl SimulatedExecutor {
    pub fn new(seed: u64) -> Self {
        Self {
            profiles: HashMap::new(),
            latency: Duration::ZERO,
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }

    /// Fail `rate` of the executions of `job_type` with `error_code`
    pub fn with_failure_rate(
        mut self,
        job_type: impl Into<String>,
        rate: f64,
        error_code: impl Into<ErrorCode>,
    ) -> Self {
        let error_code = error_code.into();
        let message = format!("simulated {} failure", error_code);
        self.profiles.insert(
            job_type.into(),
            FailureProfile {
                failure_rate: rate.clamp(0.0, 1.0),
                error_code,
                message,
            },
        );
        self
    }

    /// Sleep this long in every execution
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    async fn execute(&self, job: &JobMessage) -> ExecutionOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let Some(profile) = self.profiles.get(&job.job_type) else {
            return ExecutionOutcome::Success;
        };

        let roll = self.rng.lock().unwrap_or_else(|p| p.into_inner()).f64();
        if roll < profile.failure_rate {
            ExecutionOutcome::failure(profile.error_code.clone(), profile.message.clone())
        } else {
            ExecutionOutcome::Success
        }
    }
}
