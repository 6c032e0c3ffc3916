//! JobGate - circuit-breaker routing engine for asynchronous job pipelines
//!
//! This crate decides, for every job delivered from a queue, whether to
//! acknowledge it, retry it after a delay, or quarantine it:
//! - Failure counters per (job type, error code) in a shared store, so a
//!   circuit opens only when one failure mode dominates
//! - Per-job-type circuits (Closed → Open → Probing) with a cooldown and a
//!   single recovery probe
//! - Typed execution outcomes: executors never throw, panics and timeouts
//!   become `INTERNAL_ERROR`
//! - Infrastructure faults release the delivery instead of routing it
//!
//! # Example
//!
//! ```rust
//! use job_gate::{JobConsumer, JobMessage, MemoryStore, MemoryTransport, ScriptedExecutor, Settlement};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(MemoryTransport::new());
//! let consumer = JobConsumer::builder(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ScriptedExecutor::new().fail_always("email", "API_TIMEOUT")),
//!     transport.clone(),
//! )
//! .failure_threshold(5)
//! .cooldown_secs(60)
//! .on_open(|alert| eprintln!("circuit {} opened on {}", alert.job_type, alert.error_code))
//! .build()?;
//!
//! transport.submit(&JobMessage::new("email", serde_json::json!({"to": "a@example.com"})))?;
//! let settlement = consumer.process_next().await?;
//! assert!(matches!(settlement, Some(Settlement::Retried { next_attempt: 1, .. })));
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod bulkhead;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod executor;
pub mod health;
pub mod job;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod routing;
pub mod storage;
pub mod transport;

pub use builder::ConsumerBuilder;
pub use bulkhead::{BulkheadPermit, JobTypeBulkhead};
pub use callbacks::{Callbacks, CircuitAlert};
pub use circuit::{
    CircuitBreakerEngine, CircuitRecord, CircuitSnapshot, CircuitState, CircuitView, KeySpace,
};
pub use classifier::{
    DefaultClassifier, FailureClassifier, FailureContext, IgnoreErrorCodes, PredicateClassifier,
};
pub use config::RouterConfig;
pub use consumer::{ConsumerStats, JobConsumer, RoutedJob, Settlement, StatsSnapshot};
pub use errors::{ConfigError, ConsumeError, StoreError, TransportError};
pub use executor::{
    ErrorCode, ExecutionOutcome, FailureProfile, JobExecutor, ScriptedExecutor, SimulatedExecutor,
    guarded_execute,
};
pub use health::{HealthStatus, HealthTracker};
pub use job::{JobMessage, JobMetadata, QuarantineMessage};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use routing::{QuarantineReason, RoutingDecision, RoutingInput, decide};
pub use storage::{FailureStore, MemoryStore};
pub use transport::{Delivery, JobTransport, MemoryTransport, ScheduledRetry};
