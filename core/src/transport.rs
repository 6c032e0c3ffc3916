//! Queue transport contract and an in-process implementation
//!
//! The broker itself is outside this crate. A transport hands out deliveries
//! from the main queue and accepts the consumer's settlement of each one:
//! ack, release for redelivery, reject, or publication to the retry and
//! quarantine channels.

use crate::errors::TransportError;
use crate::job::{JobMessage, QuarantineMessage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One message received from the main queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned handle used to settle the delivery
    pub tag: u64,
    pub body: Vec<u8>,
    /// Whether the broker delivered this message before
    pub redelivered: bool,
}

/// Source of deliveries and sink of routed jobs
#[async_trait]
pub trait JobTransport: Send + Sync + std::fmt::Debug {
    /// Wait for the next delivery; `None` once the transport is closed
    async fn receive(&self) -> Result<Option<Delivery>, TransportError>;

    /// Remove a delivery from the main queue
    async fn ack(&self, tag: u64) -> Result<(), TransportError>;

    /// Hand a delivery back to the broker for natural redelivery
    async fn release(&self, tag: u64) -> Result<(), TransportError>;

    /// Drop a delivery that can never be processed
    async fn reject(&self, tag: u64) -> Result<(), TransportError>;

    /// Emit a job to the delayed-redelivery channel
    async fn publish_retry(&self, job: &JobMessage, delay: Duration)
    -> Result<(), TransportError>;

    /// Emit a job to the terminal-failure channel
    async fn publish_quarantine(&self, message: &QuarantineMessage) -> Result<(), TransportError>;
}

/// Retry waiting for its delay to elapse
#[derive(Debug, Clone)]
pub struct ScheduledRetry {
    pub job: JobMessage,
    pub delay: Duration,
    due: Instant,
}

#[derive(Debug, Default)]
struct Queues {
    ready: VecDeque<Delivery>,
    unacked: HashMap<u64, Delivery>,
    scheduled: Vec<ScheduledRetry>,
    quarantined: Vec<QuarantineMessage>,
    acked: usize,
    rejected: usize,
}

/// In-process transport for tests and demos
///
/// Retries are held until their delay elapses and then moved back to the main
/// queue, the way a TTL queue dead-letters into the main exchange.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    queues: Mutex<Queues>,
    notify: Notify,
    next_tag: AtomicU64,
    closed: AtomicBool,
    fail_publish: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job on the main queue
    pub fn submit(&self, job: &JobMessage) -> Result<u64, TransportError> {
        let body = job.to_vec().map_err(|e| TransportError::Publish {
            channel: "main".to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.submit_raw(body))
    }

    /// Enqueue an arbitrary body on the main queue
    pub fn submit_raw(&self, body: Vec<u8>) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().ready.push_back(Delivery {
            tag,
            body,
            redelivered: false,
        });
        self.notify.notify_one();
        tag
    }

    /// Stop handing out deliveries; pending `receive` calls return `None`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Make downstream publication fail
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Move every scheduled retry to the main queue regardless of its delay
    pub fn redeliver_retries_now(&self) -> usize {
        let mut queues = self.lock();
        let retries: Vec<ScheduledRetry> = queues.scheduled.drain(..).collect();
        let count = retries.len();
        for retry in retries {
            self.enqueue_retry(&mut queues, retry.job);
        }
        drop(queues);
        if count > 0 {
            self.notify.notify_one();
        }
        count
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn acked_count(&self) -> usize {
        self.lock().acked
    }

    pub fn rejected_count(&self) -> usize {
        self.lock().rejected
    }

    /// Retries published and not yet moved back to the main queue
    pub fn scheduled_retries(&self) -> Vec<ScheduledRetry> {
        self.lock().scheduled.clone()
    }

    pub fn quarantined(&self) -> Vec<QuarantineMessage> {
        self.lock().quarantined.clone()
    }

    // Private helper methods

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enqueue_retry(&self, queues: &mut Queues, job: JobMessage) {
        match job.to_vec() {
            Ok(body) => {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
                queues.ready.push_back(Delivery {
                    tag,
                    body,
                    redelivered: false,
                });
            }
            Err(e) => tracing::error!(error = %e, "Dropping unencodable retry"),
        }
    }

    /// Promote due retries; returns the instant the next one becomes due
    fn promote_due(&self, queues: &mut Queues, now: Instant) -> Option<Instant> {
        let (due, pending): (Vec<_>, Vec<_>) = queues
            .scheduled
            .drain(..)
            .partition(|retry| retry.due <= now);
        queues.scheduled = pending;
        for retry in due {
            self.enqueue_retry(queues, retry.job);
        }
        queues.scheduled.iter().map(|r| r.due).min()
    }

    fn settle(&self, tag: u64) -> Result<(Delivery, std::sync::MutexGuard<'_, Queues>), TransportError> {
        let mut queues = self.lock();
        let delivery = queues
            .unacked
            .remove(&tag)
            .ok_or(TransportError::UnknownDelivery(tag))?;
        Ok((delivery, queues))
    }

    fn check_publish(&self, channel: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                channel: channel.to_string(),
                reason: "broker refused message".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobTransport for MemoryTransport {
    async fn receive(&self) -> Result<Option<Delivery>, TransportError> {
        loop {
            let notified = self.notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let next_due = {
                let mut queues = self.lock();
                let next_due = self.promote_due(&mut queues, Instant::now());
                if let Some(delivery) = queues.ready.pop_front() {
                    queues.unacked.insert(delivery.tag, delivery.clone());
                    return Ok(Some(delivery));
                }
                next_due
            };

            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        let (_, mut queues) = self.settle(tag)?;
        queues.acked += 1;
        Ok(())
    }

    async fn release(&self, tag: u64) -> Result<(), TransportError> {
        let (mut delivery, mut queues) = self.settle(tag)?;
        delivery.redelivered = true;
        queues.ready.push_back(delivery);
        drop(queues);
        self.notify.notify_one();
        Ok(())
    }

    async fn reject(&self, tag: u64) -> Result<(), TransportError> {
        let (_, mut queues) = self.settle(tag)?;
        queues.rejected += 1;
        Ok(())
    }

    async fn publish_retry(
        &self,
        job: &JobMessage,
        delay: Duration,
    ) -> Result<(), TransportError> {
        self.check_publish("retry")?;
        self.lock().scheduled.push(ScheduledRetry {
            job: job.clone(),
            delay,
            due: Instant::now() + delay,
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn publish_quarantine(&self, message: &QuarantineMessage) -> Result<(), TransportError> {
        self.check_publish("quarantine")?;
        self.lock().quarantined.push(message.clone());
        Ok(())
    }
}
