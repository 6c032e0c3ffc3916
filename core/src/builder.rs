//! Builder API for wiring a job consumer

use crate::{
    bulkhead::JobTypeBulkhead,
    callbacks::{Callbacks, CircuitAlert},
    circuit::CircuitBreakerEngine,
    classifier::{DefaultClassifier, FailureClassifier},
    config::RouterConfig,
    consumer::{ConsumerStats, JobConsumer},
    errors::ConfigError,
    executor::JobExecutor,
    health::HealthTracker,
    storage::FailureStore,
    transport::JobTransport,
};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Builder for creating job consumers with fluent API
pub struct ConsumerBuilder {
    store: Arc<dyn FailureStore>,
    executor: Arc<dyn JobExecutor>,
    transport: Arc<dyn JobTransport>,
    config: RouterConfig,
    classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl ConsumerBuilder {
    pub fn new(
        store: Arc<dyn FailureStore>,
        executor: Arc<dyn JobExecutor>,
        transport: Arc<dyn JobTransport>,
    ) -> Self {
        Self {
            store,
            executor,
            transport,
            config: RouterConfig::default(),
            classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration (e.g. one loaded with [`RouterConfig::load`])
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the counter value at which a circuit opens
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the cooldown before an open circuit admits a probe
    pub fn cooldown_secs(mut self, seconds: u64) -> Self {
        self.config.cooldown_secs = seconds;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.config.prefetch = prefetch;
        self
    }

    /// Cap concurrent deliveries of one job type (bulkheading)
    ///
    /// Deliveries over the limit are handed back to the broker untouched.
    /// Validated by [`build`](Self::build): 0 is rejected.
    pub fn max_in_flight_per_job_type(mut self, limit: usize) -> Self {
        self.config.max_in_flight_per_job_type = Some(limit);
        self
    }

    /// Set a failure classifier to filter which failures count toward a circuit
    ///
    /// # Examples
    ///
    /// ```rust
    /// use job_gate::{ConsumerBuilder, IgnoreErrorCodes, MemoryStore, MemoryTransport, ScriptedExecutor};
    /// use std::sync::Arc;
    ///
    /// let consumer = ConsumerBuilder::new(
    ///     Arc::new(MemoryStore::new()),
    ///     Arc::new(ScriptedExecutor::new()),
    ///     Arc::new(MemoryTransport::new()),
    /// )
    /// .classifier(Arc::new(IgnoreErrorCodes::new(["VALIDATION_ERROR"])))
    /// .build()
    /// .unwrap();
    /// ```
    pub fn classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the alerting hook fired when a circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitAlert) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when a circuit closes (probe success or reset)
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the consumer
    pub fn build(self) -> Result<JobConsumer, ConfigError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let bulkhead = config
            .max_in_flight_per_job_type
            .map(|limit| Arc::new(JobTypeBulkhead::new(limit)));

        Ok(JobConsumer {
            engine: CircuitBreakerEngine::new(self.store, config.clone()),
            executor: self.executor,
            transport: self.transport,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(DefaultClassifier)),
            callbacks: self.callbacks,
            hooks: TaskTracker::new(),
            bulkhead,
            health: HealthTracker::new(config.degraded_after),
            stats: ConsumerStats::default(),
            config,
        })
    }
}

impl std::fmt::Debug for ConsumerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerBuilder")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptedExecutor;
    use crate::storage::MemoryStore;
    use crate::transport::MemoryTransport;

    fn builder() -> ConsumerBuilder {
        ConsumerBuilder::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(MemoryTransport::new()),
        )
    }

    #[test]
    fn test_builder_defaults() {
        let consumer = builder().build().unwrap();

        assert_eq!(consumer.config(), &RouterConfig::default());
        assert!(consumer.health().is_healthy());
        assert!(consumer.bulkhead.is_none());
    }

    #[test]
    fn test_builder_custom_config() {
        let consumer = builder()
            .failure_threshold(10)
            .cooldown_secs(30)
            .max_retries(5)
            .prefetch(4)
            .max_in_flight_per_job_type(2)
            .build()
            .unwrap();

        let config = consumer.config();
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.cooldown_secs, 30);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.prefetch, 4);
        assert_eq!(consumer.bulkhead.as_ref().map(|b| b.limit()), Some(2));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        assert!(matches!(
            builder().failure_threshold(0).build(),
            Err(ConfigError::Invalid {
                field: "failure_threshold",
                ..
            })
        ));
        assert!(builder().max_in_flight_per_job_type(0).build().is_err());
    }

    #[tokio::test]
    async fn test_builder_with_open_callback() {
        use crate::job::JobMessage;
        use std::sync::Mutex;

        let alerts = Arc::new(Mutex::new(Vec::new()));
        let sink = alerts.clone();

        let consumer = ConsumerBuilder::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedExecutor::new().fail_always("email", "API_TIMEOUT")),
            Arc::new(MemoryTransport::new()),
        )
        .failure_threshold(2)
        .on_open(move |alert| sink.lock().unwrap().push(alert.clone()))
        .build()
        .unwrap();

        let job = JobMessage::new("email", serde_json::Value::Null);
        consumer.route(&job).await.unwrap();
        consumer.route(&job).await.unwrap();
        consumer.wait_for_hooks().await;

        let alerts = alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].error_code, "API_TIMEOUT");
        assert_eq!(alerts[0].failure_count, 2);
    }
}
