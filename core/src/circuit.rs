//! Circuit breaker engine backed by the failure store
//!
//! The engine keeps no state between calls. Every operation reads or writes
//! the [`FailureStore`], which lets any number of workers share one breaker
//! per job type. The Closed → Open → Probing lifecycle is evaluated by a state
//! machine hydrated from the stored circuit record on each read.

use crate::config::RouterConfig;
use crate::errors::StoreError;
use crate::executor::ErrorCode;
use crate::storage::FailureStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable state of a job type's circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitState {
    Closed,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("CLOSED"),
            CircuitState::Open => f.write_str("OPEN"),
        }
    }
}

/// Circuit record as persisted in the store; absence means closed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum CircuitRecord {
    #[default]
    Closed,
    Open {
        #[serde(rename = "openedAt")]
        opened_at: DateTime<Utc>,
    },
}

impl CircuitRecord {
    pub fn state(&self) -> CircuitState {
        match self {
            CircuitRecord::Closed => CircuitState::Closed,
            CircuitRecord::Open { .. } => CircuitState::Open,
        }
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CircuitRecord::Closed => None,
            CircuitRecord::Open { opened_at } => Some(*opened_at),
        }
    }
}

/// Circuit state and probe eligibility read in a single pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitView {
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    /// Open and past its cooldown: the next execution is a probe
    pub probe_eligible: bool,
    /// Time left before a probe is admitted (open circuits only)
    pub cooldown_remaining: Option<Duration>,
}

/// Monitoring view of one job type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub job_type: String,
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    pub probe_eligible: bool,
    /// Live failure counters keyed by error code
    pub failure_counts: BTreeMap<String, u64>,
}

mod machine {
    //! Per-read circuit lifecycle, hydrated from a stored record

    use super::CircuitRecord;
    use chrono::{DateTime, Utc};
    use state_machines::state_machine;
    use std::time::Duration;

    /// Everything the guards need to evaluate one circuit
    #[derive(Debug, Clone, Default)]
    pub struct ProbeContext {
        pub record: CircuitRecord,
        pub now: DateTime<Utc>,
        pub cooldown: Duration,
    }

    /// Data specific to the Open state
    #[derive(Debug, Clone, Default)]
    pub struct OpenData {
        pub opened_at: DateTime<Utc>,
    }

    state_machine! {
        name: Circuit,
        context: ProbeContext,
        dynamic: true,

        initial: Closed,
        states: [
            Closed,
            Open(OpenData),
            Probing,
        ],
        events {
            trip {
                guards: [recorded_open],
                transition: { from: Closed, to: Open }
            }
            admit_probe {
                guards: [cooldown_elapsed],
                transition: { from: Open, to: Probing }
            }
        }
    }

    impl Circuit<Closed> {
        /// The stored record says the circuit is open
        fn recorded_open(&self, ctx: &ProbeContext) -> bool {
            matches!(ctx.record, CircuitRecord::Open { .. })
        }
    }

    impl Circuit<Open> {
        /// Cooldown has elapsed since the circuit opened
        fn cooldown_elapsed(&self, ctx: &ProbeContext) -> bool {
            let Some(data) = self.state_data_open() else {
                return false;
            };
            let cooldown =
                chrono::Duration::from_std(ctx.cooldown).unwrap_or(chrono::Duration::MAX);
            ctx.now.signed_duration_since(data.opened_at) >= cooldown
        }
    }

    /// Result of replaying a stored record through the lifecycle
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Evaluation {
        pub open: bool,
        pub probe_eligible: bool,
    }

    pub fn evaluate(ctx: ProbeContext) -> Evaluation {
        let opened_at = ctx.record.opened_at();
        let mut circuit = DynamicCircuit::new(ctx);

        if circuit.handle(CircuitEvent::Trip).is_ok()
            && let (Some(data), Some(opened_at)) = (circuit.open_data_mut(), opened_at)
        {
            data.opened_at = opened_at;
        }

        let open = circuit.current_state() == "Open";
        let probe_eligible = open && circuit.handle(CircuitEvent::AdmitProbe).is_ok();

        Evaluation {
            open,
            probe_eligible,
        }
    }
}

/// Store key layout for one deployment
///
/// Job types and error codes are escaped so a `:` inside them cannot make one
/// job type's prefix match another's keys.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn failure_key(&self, job_type: &str, error_code: &ErrorCode) -> String {
        format!(
            "{}{}",
            self.failure_prefix(job_type),
            escape(error_code.as_str())
        )
    }

    pub fn failure_prefix(&self, job_type: &str) -> String {
        format!("{}:failures:{}:", self.prefix, escape(job_type))
    }

    pub fn circuit_key(&self, job_type: &str) -> String {
        format!("{}{}", self.circuit_prefix(), escape(job_type))
    }

    pub fn circuit_prefix(&self) -> String {
        format!("{}:circuit:", self.prefix)
    }
}

fn escape(component: &str) -> String {
    component.replace('%', "%25").replace(':', "%3A")
}

fn unescape(component: &str) -> String {
    component.replace("%3A", ":").replace("%25", "%")
}

/// Failure counting and circuit state machine over a shared store
#[derive(Clone)]
pub struct CircuitBreakerEngine {
    store: Arc<dyn FailureStore>,
    config: Arc<RouterConfig>,
    keys: KeySpace,
}

impl fmt::Debug for CircuitBreakerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerEngine")
            .field("store", &self.store)
            .field("failure_threshold", &self.config.failure_threshold)
            .field("cooldown_secs", &self.config.cooldown_secs)
            .field("keys", &self.keys)
            .finish()
    }
}

impl CircuitBreakerEngine {
    pub fn new(store: Arc<dyn FailureStore>, config: Arc<RouterConfig>) -> Self {
        let keys = KeySpace::new(config.key_prefix.clone());
        Self {
            store,
            config,
            keys,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Atomically count one failure, returning the new counter value
    pub async fn record_failure(
        &self,
        job_type: &str,
        error_code: &ErrorCode,
    ) -> Result<u64, StoreError> {
        let key = self.keys.failure_key(job_type, error_code);
        let count = self
            .guarded(
                "incr",
                self.store
                    .incr_with_expiry(&key, self.config.counter_ttl()),
            )
            .await?;
        debug!(
            job_type = %job_type,
            error_code = %error_code,
            failure_count = count,
            "Recorded failure"
        );
        Ok(count)
    }

    /// Current value of one failure counter (0 when absent)
    pub async fn failure_count(
        &self,
        job_type: &str,
        error_code: &ErrorCode,
    ) -> Result<u64, StoreError> {
        let key = self.keys.failure_key(job_type, error_code);
        let value = self.guarded("get", self.store.get(&key)).await?;
        parse_count(&key, value)
    }

    /// Whether a counter has reached the failure threshold
    pub async fn exceeds_threshold(
        &self,
        job_type: &str,
        error_code: &ErrorCode,
    ) -> Result<bool, StoreError> {
        let count = self.failure_count(job_type, error_code).await?;
        Ok(count >= self.config.failure_threshold)
    }

    /// Mark the circuit open as of now, returning `openedAt`
    ///
    /// Overwrites any existing record: calling it on an open circuit starts a
    /// fresh cooldown window. Callers only invoke it from a closed circuit.
    pub async fn open(&self, job_type: &str) -> Result<DateTime<Utc>, StoreError> {
        let opened_at = self.guarded("time", self.store.now()).await?;
        self.write_record(job_type, &CircuitRecord::Open { opened_at })
            .await?;
        warn!(
            job_type = %job_type,
            opened_at = %opened_at,
            cooldown_secs = self.config.cooldown_secs,
            "Circuit opened"
        );
        Ok(opened_at)
    }

    /// Close the circuit and forget every failure counter of the job type
    ///
    /// Counters are deleted before the record is written, so a store failure
    /// midway leaves the previous state (still open, still probe-eligible).
    pub async fn close(&self, job_type: &str) -> Result<(), StoreError> {
        let prefix = self.keys.failure_prefix(job_type);
        let counters = self
            .guarded("scan", self.store.keys_with_prefix(&prefix))
            .await?;
        let removed = if counters.is_empty() {
            0
        } else {
            self.guarded("del", self.store.delete(&counters)).await?
        };

        self.write_record(job_type, &CircuitRecord::Closed).await?;

        info!(
            job_type = %job_type,
            counters_removed = removed,
            "Circuit closed"
        );
        Ok(())
    }

    /// Reset entry point for operators; same as [`close`](Self::close)
    pub async fn reset(&self, job_type: &str) -> Result<(), StoreError> {
        self.close(job_type).await
    }

    /// Stored state, without acting on an elapsed cooldown
    pub async fn state(&self, job_type: &str) -> Result<CircuitState, StoreError> {
        Ok(self.read_record(job_type).await?.state())
    }

    /// Whether an open circuit's cooldown has elapsed; false when closed
    ///
    /// Never closes the circuit: only a successful probe execution does.
    pub async fn can_probe(&self, job_type: &str) -> Result<bool, StoreError> {
        Ok(self.view(job_type).await?.probe_eligible)
    }

    /// Read state and probe eligibility from one record read
    pub async fn view(&self, job_type: &str) -> Result<CircuitView, StoreError> {
        let record = self.read_record(job_type).await?;
        let now = match record {
            CircuitRecord::Closed => None,
            CircuitRecord::Open { .. } => Some(self.guarded("time", self.store.now()).await?),
        };

        let evaluation = machine::evaluate(machine::ProbeContext {
            record: record.clone(),
            now: now.unwrap_or_default(),
            cooldown: self.config.cooldown(),
        });

        let cooldown_remaining = record
            .opened_at()
            .zip(now)
            .map(|(opened_at, now)| cooldown_remaining(opened_at, now, self.config.cooldown()));

        Ok(CircuitView {
            state: if evaluation.open {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            opened_at: record.opened_at(),
            probe_eligible: evaluation.probe_eligible,
            cooldown_remaining,
        })
    }

    /// Full monitoring view: state, probe eligibility and live counters
    pub async fn snapshot(&self, job_type: &str) -> Result<CircuitSnapshot, StoreError> {
        let view = self.view(job_type).await?;
        let prefix = self.keys.failure_prefix(job_type);
        let keys = self
            .guarded("scan", self.store.keys_with_prefix(&prefix))
            .await?;

        let mut failure_counts = BTreeMap::new();
        for key in keys {
            let value = self.guarded("get", self.store.get(&key)).await?;
            let count = parse_count(&key, value)?;
            if count == 0 {
                continue;
            }
            let code = unescape(key.strip_prefix(&prefix).unwrap_or(&key));
            failure_counts.insert(code, count);
        }

        Ok(CircuitSnapshot {
            job_type: job_type.to_string(),
            state: view.state,
            opened_at: view.opened_at,
            probe_eligible: view.probe_eligible,
            failure_counts,
        })
    }

    /// Job types whose circuit is currently open
    pub async fn open_circuits(&self) -> Result<Vec<String>, StoreError> {
        let prefix = self.keys.circuit_prefix();
        let keys = self
            .guarded("scan", self.store.keys_with_prefix(&prefix))
            .await?;

        let mut open = Vec::new();
        for key in keys {
            let value = self.guarded("get", self.store.get(&key)).await?;
            if decode_record(&key, value)?.state() == CircuitState::Open {
                open.push(unescape(key.strip_prefix(&prefix).unwrap_or(&key)));
            }
        }
        Ok(open)
    }

    // Private helper methods

    async fn read_record(&self, job_type: &str) -> Result<CircuitRecord, StoreError> {
        let key = self.keys.circuit_key(job_type);
        let value = self.guarded("get", self.store.get(&key)).await?;
        decode_record(&key, value)
    }

    async fn write_record(&self, job_type: &str, record: &CircuitRecord) -> Result<(), StoreError> {
        let key = self.keys.circuit_key(job_type);
        let value = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            value: e.to_string(),
        })?;
        self.guarded("set", self.store.set(&key, &value)).await
    }

    /// Bound a store call by the configured timeout
    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let after = self.config.store_timeout();
        match tokio::time::timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { operation, after }),
        }
    }
}

fn decode_record(key: &str, value: Option<String>) -> Result<CircuitRecord, StoreError> {
    match value {
        None => Ok(CircuitRecord::Closed),
        Some(raw) => serde_json::from_str(&raw).map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_count(key: &str, value: Option<String>) -> Result<u64, StoreError> {
    match value {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn cooldown_remaining(
    opened_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Duration {
    let elapsed = now
        .signed_duration_since(opened_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    cooldown.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn engine_with(config: RouterConfig) -> (CircuitBreakerEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = CircuitBreakerEngine::new(store.clone(), Arc::new(config));
        (engine, store)
    }

    fn engine() -> (CircuitBreakerEngine, Arc<MemoryStore>) {
        engine_with(RouterConfig::default())
    }

    fn code(c: &str) -> ErrorCode {
        ErrorCode::new(c)
    }

    #[tokio::test]
    async fn test_absent_record_is_closed() {
        let (engine, _) = engine();

        assert_eq!(engine.state("email").await.unwrap(), CircuitState::Closed);
        assert!(!engine.can_probe("email").await.unwrap());
    }

    #[tokio::test]
    async fn test_threshold_reached_after_n_failures() {
        let (engine, _) = engine();
        let timeout = code("API_TIMEOUT");

        for expected in 1..=4 {
            assert_eq!(
                engine.record_failure("email", &timeout).await.unwrap(),
                expected
            );
            assert!(!engine.exceeds_threshold("email", &timeout).await.unwrap());
        }

        assert_eq!(engine.record_failure("email", &timeout).await.unwrap(), 5);
        assert!(engine.exceeds_threshold("email", &timeout).await.unwrap());
    }

    #[tokio::test]
    async fn test_error_codes_counted_independently() {
        let (engine, _) = engine();

        for _ in 0..4 {
            engine
                .record_failure("email", &code("API_TIMEOUT"))
                .await
                .unwrap();
            engine
                .record_failure("email", &code("VALIDATION_ERROR"))
                .await
                .unwrap();
        }

        assert!(
            !engine
                .exceeds_threshold("email", &code("API_TIMEOUT"))
                .await
                .unwrap()
        );
        assert!(
            !engine
                .exceeds_threshold("email", &code("VALIDATION_ERROR"))
                .await
                .unwrap()
        );
        assert_eq!(
            engine
                .failure_count("email", &code("API_TIMEOUT"))
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_open_then_probe_after_cooldown() {
        let (engine, store) = engine();

        engine.open("email").await.unwrap();
        assert_eq!(engine.state("email").await.unwrap(), CircuitState::Open);
        assert!(!engine.can_probe("email").await.unwrap());

        store.advance(Duration::from_secs(59));
        assert!(!engine.can_probe("email").await.unwrap());

        store.advance(Duration::from_secs(1));
        assert!(engine.can_probe("email").await.unwrap());
        // Eligibility never closes the circuit by itself
        assert_eq!(engine.state("email").await.unwrap(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_close_forgets_all_counters_of_job_type() {
        let (engine, _) = engine();

        engine
            .record_failure("email", &code("API_TIMEOUT"))
            .await
            .unwrap();
        engine
            .record_failure("email", &code("SMTP_DOWN"))
            .await
            .unwrap();
        engine
            .record_failure("sms", &code("API_TIMEOUT"))
            .await
            .unwrap();
        engine.open("email").await.unwrap();

        engine.close("email").await.unwrap();

        assert_eq!(engine.state("email").await.unwrap(), CircuitState::Closed);
        let snapshot = engine.snapshot("email").await.unwrap();
        assert!(snapshot.failure_counts.is_empty());
        assert_eq!(
            engine
                .failure_count("sms", &code("API_TIMEOUT"))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_counter_delete_leaves_circuit_open() {
        let (engine, store) = engine();
        let timeout = code("API_TIMEOUT");
        for _ in 0..5 {
            engine.record_failure("email", &timeout).await.unwrap();
        }
        let opened_at = engine.open("email").await.unwrap();
        store.advance(Duration::from_secs(60));
        store.set_delete_failure(true);

        assert!(engine.close("email").await.is_err());

        let view = engine.view("email").await.unwrap();
        assert_eq!(view.state, CircuitState::Open);
        assert_eq!(view.opened_at, Some(opened_at));
        assert!(view.probe_eligible);
        assert_eq!(engine.failure_count("email", &timeout).await.unwrap(), 5);

        store.set_delete_failure(false);
        engine.close("email").await.unwrap();

        assert_eq!(engine.state("email").await.unwrap(), CircuitState::Closed);
        assert_eq!(engine.failure_count("email", &timeout).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (engine, _) = engine();

        engine.close("email").await.unwrap();
        engine.close("email").await.unwrap();

        assert_eq!(engine.state("email").await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_job_type_with_colon_does_not_leak_into_prefix() {
        let (engine, _) = engine();

        engine
            .record_failure("a:b", &code("API_TIMEOUT"))
            .await
            .unwrap();
        engine.close("a").await.unwrap();

        assert_eq!(
            engine
                .failure_count("a:b", &code("API_TIMEOUT"))
                .await
                .unwrap(),
            1
        );
        let snapshot = engine.snapshot("a:b").await.unwrap();
        assert_eq!(snapshot.failure_counts.get("API_TIMEOUT"), Some(&1));
    }

    #[tokio::test]
    async fn test_snapshot_and_open_circuits() {
        let (engine, store) = engine();

        engine
            .record_failure("email", &code("API_TIMEOUT"))
            .await
            .unwrap();
        engine
            .record_failure("email", &code("API_TIMEOUT"))
            .await
            .unwrap();
        let opened_at = engine.open("email").await.unwrap();
        engine.close("sms").await.unwrap();
        store.advance(Duration::from_secs(61));

        let snapshot = engine.snapshot("email").await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.opened_at, Some(opened_at));
        assert!(snapshot.probe_eligible);
        assert_eq!(snapshot.failure_counts.get("API_TIMEOUT"), Some(&2));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "OPEN");
        assert_eq!(json["jobType"], "email");

        assert_eq!(engine.open_circuits().await.unwrap(), vec!["email".to_string()]);
    }

    #[tokio::test]
    async fn test_record_wire_format() {
        let (engine, store) = engine();
        engine.open("email").await.unwrap();

        let raw = store
            .get(&engine.keys().circuit_key("email"))
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["state"], "OPEN");
        assert!(value["openedAt"].is_string());

        engine.close("email").await.unwrap();
        let raw = store
            .get(&engine.keys().circuit_key("email"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw, r#"{"state":"CLOSED"}"#);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let (engine, store) = engine();
        store
            .set(&engine.keys().circuit_key("email"), "garbage")
            .await
            .unwrap();

        assert!(matches!(
            engine.state("email").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_counter_expires_after_ttl() {
        let (engine, store) = engine_with(RouterConfig {
            counter_ttl_secs: 30,
            ..Default::default()
        });

        engine
            .record_failure("email", &code("API_TIMEOUT"))
            .await
            .unwrap();
        store.advance(Duration::from_secs(31));

        assert_eq!(
            engine
                .failure_count("email", &code("API_TIMEOUT"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_calls_time_out() {
        let (engine, store) = engine_with(RouterConfig {
            store_timeout_ms: 100,
            ..Default::default()
        });
        store.set_latency(Duration::from_secs(5));

        let err = engine.state("email").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "get", .. }));
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let (engine, store) = engine();
        store.set_unavailable(true);

        assert!(matches!(
            engine.record_failure("email", &code("API_TIMEOUT")).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_state_machine_closed_record() {
        let eval = machine::evaluate(machine::ProbeContext {
            record: CircuitRecord::Closed,
            now: Utc::now(),
            cooldown: Duration::from_secs(60),
        });

        assert!(!eval.open);
        assert!(!eval.probe_eligible);
    }

    #[test]
    fn test_state_machine_open_record_within_cooldown() {
        let now = Utc::now();
        let eval = machine::evaluate(machine::ProbeContext {
            record: CircuitRecord::Open {
                opened_at: now - chrono::Duration::seconds(10),
            },
            now,
            cooldown: Duration::from_secs(60),
        });

        assert!(eval.open);
        assert!(!eval.probe_eligible);
    }

    #[test]
    fn test_state_machine_open_record_past_cooldown() {
        let now = Utc::now();
        let eval = machine::evaluate(machine::ProbeContext {
            record: CircuitRecord::Open {
                opened_at: now - chrono::Duration::seconds(60),
            },
            now,
            cooldown: Duration::from_secs(60),
        });

        assert!(eval.open);
        assert!(eval.probe_eligible);
    }

    #[test]
    fn test_cooldown_remaining() {
        let now = Utc::now();
        let opened = now - chrono::Duration::seconds(45);

        assert_eq!(
            cooldown_remaining(opened, now, Duration::from_secs(60)),
            Duration::from_secs(15)
        );
        assert_eq!(
            cooldown_remaining(opened, now, Duration::from_secs(30)),
            Duration::ZERO
        );
    }
}
