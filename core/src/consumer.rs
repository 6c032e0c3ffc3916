//! Job consumer loop
//!
//! Drives one delivery through the breaker: read the circuit, execute or
//! suppress, record the outcome, decide, then settle the delivery with the
//! transport. Store and transport faults never turn into a routing decision;
//! the delivery is released so the broker redelivers it.

use crate::builder::ConsumerBuilder;
use crate::bulkhead::JobTypeBulkhead;
use crate::callbacks::{Callbacks, CircuitAlert};
use crate::circuit::{CircuitBreakerEngine, CircuitSnapshot, CircuitState};
use crate::classifier::{FailureClassifier, FailureContext};
use crate::config::RouterConfig;
use crate::errors::{ConsumeError, StoreError};
use crate::executor::{ErrorCode, ExecutionOutcome, JobExecutor, guarded_execute};
use crate::health::{HealthStatus, HealthTracker};
use crate::job::{JobMessage, QuarantineMessage};
use crate::routing::{QuarantineReason, RoutingDecision, RoutingInput, decide};
use crate::storage::FailureStore;
use crate::transport::{Delivery, JobTransport};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Pause before retrying after the transport failed to hand out a delivery
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

/// Pause a slot takes after deferring a delivery to a full bulkhead
const DEFER_BACKOFF: Duration = Duration::from_millis(50);

/// Result of one pass through the pipeline, before settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedJob {
    pub decision: RoutingDecision,
    pub outcome: ExecutionOutcome,
    pub state_before: CircuitState,
    /// Whether the executor ran (false when an open circuit suppressed it)
    pub executed: bool,
}

/// How a delivery was settled with the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked {
        closed_circuit: bool,
    },
    Retried {
        next_attempt: u32,
        delay: Duration,
    },
    Quarantined {
        reason: QuarantineReason,
    },
    /// Handed back untouched because the job type's bulkhead was full
    Deferred,
}

/// Delivery counters of one consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    acked: AtomicU64,
    retried: AtomicU64,
    quarantined: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub acked: u64,
    pub retried: u64,
    pub quarantined: u64,
    pub released: u64,
    pub rejected: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            acked: self.acked.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn count(&self, settlement: &Settlement) {
        let counter = match settlement {
            Settlement::Acked { .. } => &self.acked,
            Settlement::Retried { .. } => &self.retried,
            Settlement::Quarantined { .. } => &self.quarantined,
            Settlement::Deferred => &self.released,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumer wiring the breaker engine, an executor and a transport
///
/// Build one with [`JobConsumer::builder`].
pub struct JobConsumer {
    pub(crate) engine: CircuitBreakerEngine,
    pub(crate) executor: Arc<dyn JobExecutor>,
    pub(crate) transport: Arc<dyn JobTransport>,
    pub(crate) config: Arc<RouterConfig>,
    pub(crate) classifier: Arc<dyn FailureClassifier>,
    pub(crate) callbacks: Callbacks,
    pub(crate) hooks: TaskTracker,
    pub(crate) bulkhead: Option<Arc<JobTypeBulkhead>>,
    pub(crate) health: HealthTracker,
    pub(crate) stats: ConsumerStats,
}

impl std::fmt::Debug for JobConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConsumer")
            .field("engine", &self.engine)
            .field("executor", &self.executor)
            .field("transport", &self.transport)
            .field("classifier", &self.classifier)
            .field("callbacks", &self.callbacks)
            .field("bulkhead", &self.bulkhead)
            .finish()
    }
}

impl JobConsumer {
    /// Start building a consumer over a store, an executor and a transport
    pub fn builder(
        store: Arc<dyn FailureStore>,
        executor: Arc<dyn JobExecutor>,
        transport: Arc<dyn JobTransport>,
    ) -> ConsumerBuilder {
        ConsumerBuilder::new(store, executor, transport)
    }

    pub fn engine(&self) -> &CircuitBreakerEngine {
        &self.engine
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Monitoring view of one job type's circuit
    pub async fn snapshot(&self, job_type: &str) -> Result<CircuitSnapshot, StoreError> {
        self.engine.snapshot(job_type).await
    }

    /// Operator reset: close the circuit and clear its counters
    pub async fn reset(&self, job_type: &str) -> Result<(), StoreError> {
        self.engine.reset(job_type).await?;
        self.fire_close(job_type);
        Ok(())
    }

    /// Run one job through the breaker and decide its route
    ///
    /// Performs every store side effect (failure counting, opening, closing
    /// after a probe) but leaves the delivery itself alone.
    pub async fn route(&self, job: &JobMessage) -> Result<RoutedJob, StoreError> {
        let job_type = job.job_type.as_str();
        let view = self.engine.view(job_type).await?;
        let state_before = view.state;

        let suppressed = state_before == CircuitState::Open && !view.probe_eligible;
        let outcome = if suppressed {
            debug!(
                job_type = %job_type,
                job_id = %job.id,
                cooldown_remaining = ?view.cooldown_remaining,
                "Circuit open, suppressing execution"
            );
            ExecutionOutcome::circuit_open()
        } else {
            if state_before == CircuitState::Open {
                info!(job_type = %job_type, job_id = %job.id, "Probe admitted");
            }
            guarded_execute(self.executor.as_ref(), job, self.config.job_timeout()).await
        };

        let state_after = match &outcome {
            ExecutionOutcome::Success => {
                if state_before == CircuitState::Open {
                    self.engine.close(job_type).await?;
                    self.fire_close(job_type);
                }
                CircuitState::Closed
            }
            ExecutionOutcome::Failure { error_code, .. } if *error_code == ErrorCode::CIRCUIT_OPEN => {
                state_before
            }
            ExecutionOutcome::Failure {
                error_code,
                message,
            } => {
                self.on_failure(job, error_code, message, state_before)
                    .await?;
                self.engine.state(job_type).await?
            }
        };

        let decision = decide(RoutingInput {
            state_before,
            outcome: &outcome,
            state_after,
            attempt_count: job.attempt_count(),
            max_retries: self.config.max_retries,
        });

        Ok(RoutedJob {
            decision,
            outcome,
            state_before,
            executed: !suppressed,
        })
    }

    /// Process and settle one delivery
    pub async fn process_delivery(&self, delivery: Delivery) -> Result<Settlement, ConsumeError> {
        let tag = delivery.tag;
        let job = match JobMessage::from_slice(&delivery.body) {
            Ok(job) => job,
            Err(e) => {
                error!(delivery_tag = tag, error = %e, "Rejecting malformed delivery");
                self.transport.reject(tag).await?;
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let _permit = match &self.bulkhead {
            Some(bulkhead) => match bulkhead.try_acquire(&job.job_type) {
                Some(permit) => Some(permit),
                None => {
                    debug!(
                        job_type = %job.job_type,
                        limit = bulkhead.limit(),
                        "Bulkhead full, deferring delivery"
                    );
                    self.transport.release(tag).await?;
                    self.stats.count(&Settlement::Deferred);
                    return Ok(Settlement::Deferred);
                }
            },
            None => None,
        };

        let routed = match self.route(&job).await {
            Ok(routed) => {
                self.health.record_success();
                routed
            }
            Err(e) => return Err(self.abandon(tag, &job, e.into()).await),
        };

        let settlement = match self.apply(&job, &routed.decision).await {
            Ok(settlement) => settlement,
            Err(e) => return Err(self.abandon(tag, &job, e).await),
        };

        if let Err(e) = self.transport.ack(tag).await {
            self.health.record_failure(&e);
            error!(
                job_type = %job.job_type,
                delivery_tag = tag,
                error = %e,
                "Failed to ack routed delivery"
            );
            return Err(e.into());
        }

        self.stats.count(&settlement);
        Ok(settlement)
    }

    /// Receive and process the next delivery; `None` once the transport closed
    pub async fn process_next(&self) -> Result<Option<Settlement>, ConsumeError> {
        match self.transport.receive().await? {
            Some(delivery) => self.process_delivery(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consume until `shutdown` fires or the transport closes
    ///
    /// Up to `prefetch` deliveries are processed concurrently. In-flight
    /// deliveries are finished before returning.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let prefetch = self.config.prefetch.max(1);
        info!(prefetch, "Consumer started");

        let slots = Arc::new(Semaphore::new(prefetch));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.transport.receive() => match received {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => break,
                    Err(e) => {
                        self.health.record_failure(&e);
                        error!(error = %e, "Failed to receive delivery");
                        drop(permit);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                        }
                        continue;
                    }
                },
            };

            let consumer = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                match consumer.process_delivery(delivery).await {
                    Ok(Settlement::Deferred) => tokio::time::sleep(DEFER_BACKOFF).await,
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Delivery not routed"),
                }
            });

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        self.wait_for_hooks().await;
        info!("Consumer stopped");
    }

    /// Wait until every open/close hook fired so far has returned
    pub async fn wait_for_hooks(&self) {
        self.hooks.close();
        self.hooks.wait().await;
        self.hooks.reopen();
    }

    // Private helper methods

    /// Hooks run on the blocking pool so a slow pager never holds up routing
    fn fire_open(&self, alert: CircuitAlert) {
        if self.callbacks.on_open.is_none() {
            return;
        }
        let callbacks = self.callbacks.clone();
        self.hooks.spawn_blocking(move || callbacks.trigger_open(&alert));
    }

    fn fire_close(&self, job_type: &str) {
        if self.callbacks.on_close.is_none() {
            return;
        }
        let callbacks = self.callbacks.clone();
        let job_type = job_type.to_string();
        self.hooks.spawn_blocking(move || callbacks.trigger_close(&job_type));
    }

    /// Count a failure and open the circuit when its counter hits the threshold
    async fn on_failure(
        &self,
        job: &JobMessage,
        error_code: &ErrorCode,
        message: &str,
        state_before: CircuitState,
    ) -> Result<(), StoreError> {
        let job_type = job.job_type.as_str();
        let ctx = FailureContext {
            job_type,
            error_code: error_code.as_str(),
            message,
            attempt_count: job.attempt_count(),
        };
        if !self.classifier.should_trip(&ctx) {
            debug!(job_type = %job_type, error_code = %error_code, "Failure not counted");
            return Ok(());
        }

        let failure_count = self.engine.record_failure(job_type, error_code).await?;

        match state_before {
            CircuitState::Closed => {
                if self.engine.exceeds_threshold(job_type, error_code).await? {
                    let opened_at = self.engine.open(job_type).await?;
                    self.fire_open(CircuitAlert {
                        job_type: job_type.to_string(),
                        error_code: error_code.to_string(),
                        failure_count,
                        opened_at,
                    });
                }
            }
            CircuitState::Open => {
                warn!(job_type = %job_type, error_code = %error_code, "Probe failed");
                if self.config.rearm_cooldown_on_failed_probe {
                    self.engine.open(job_type).await?;
                }
            }
        }
        Ok(())
    }

    /// Emit the job to the channel its decision names
    async fn apply(
        &self,
        job: &JobMessage,
        decision: &RoutingDecision,
    ) -> Result<Settlement, ConsumeError> {
        let settlement = match *decision {
            RoutingDecision::Ack { closes_circuit } => {
                debug!(job_type = %job.job_type, job_id = %job.id, reason = %decision.reason(), "Job acked");
                Settlement::Acked {
                    closed_circuit: closes_circuit,
                }
            }
            RoutingDecision::Retry { next_attempt, .. } => {
                let delay = self.config.retry_delay_for(next_attempt);
                self.transport
                    .publish_retry(&job.next_attempt(), delay)
                    .await?;
                debug!(
                    job_type = %job.job_type,
                    job_id = %job.id,
                    attempt = next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %decision.reason(),
                    "Job retried"
                );
                Settlement::Retried {
                    next_attempt,
                    delay,
                }
            }
            RoutingDecision::Quarantine { reason } => {
                let message = QuarantineMessage::new(job.clone(), reason.as_str(), Utc::now());
                self.transport.publish_quarantine(&message).await?;
                warn!(
                    job_type = %job.job_type,
                    job_id = %job.id,
                    attempt = job.attempt_count(),
                    reason = %reason,
                    "Job quarantined"
                );
                Settlement::Quarantined { reason }
            }
        };
        Ok(settlement)
    }

    /// Hand the delivery back to the broker after an infrastructure fault
    async fn abandon(&self, tag: u64, job: &JobMessage, err: ConsumeError) -> ConsumeError {
        match &err {
            ConsumeError::Store(e) => self.health.record_failure(e),
            ConsumeError::Transport(e) => self.health.record_failure(e),
            ConsumeError::Malformed(_) => {}
        }
        error!(
            job_type = %job.job_type,
            job_id = %job.id,
            delivery_tag = tag,
            error = %err,
            "Infrastructure failure, releasing delivery"
        );

        match self.transport.release(tag).await {
            Ok(()) => {
                self.stats.released.fetch_add(1, Ordering::Relaxed);
            }
            Err(release_err) => {
                error!(delivery_tag = tag, error = %release_err, "Failed to release delivery");
            }
        }
        err
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Delivery task failed");
    }
}
