//! Router configuration
//!
//! Read once at process start and immutable afterwards. Values come from
//! built-in defaults, an optional TOML file, then `JOBGATE_*` environment
//! variables, in increasing priority.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "JOBGATE";

/// Routing engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Failure counter value at which a circuit opens
    pub failure_threshold: u64,

    /// Seconds an open circuit waits before admitting a probe
    pub cooldown_secs: u64,

    /// Restart the cooldown window when a probe fails
    ///
    /// Off by default: every job after the cooldown runs as a probe until one
    /// succeeds.
    pub rearm_cooldown_on_failed_probe: bool,

    /// Retry hops allowed per logical job
    pub max_retries: u32,

    /// Base delay before a retried job is redelivered (enforced by the transport)
    pub retry_delay_ms: u64,

    /// Growth factor of the retry delay per attempt (1.0 keeps it fixed)
    pub retry_backoff_multiplier: f64,

    /// Upper bound on the computed retry delay
    pub retry_max_delay_ms: u64,

    /// Jitter factor for the retry delay (0.0 = none, 1.0 = full jitter)
    pub retry_jitter: f64,

    /// Lifetime of a failure counter from its first increment
    pub counter_ttl_secs: u64,

    /// Timeout applied to every failure store call
    pub store_timeout_ms: u64,

    /// Optional executor timeout; elapsed executions fail with `INTERNAL_ERROR`
    pub job_timeout_ms: Option<u64>,

    /// Deliveries processed concurrently by one consumer
    pub prefetch: usize,

    /// Optional cap on in-flight deliveries per job type
    pub max_in_flight_per_job_type: Option<usize>,

    /// Consecutive infrastructure failures before health reports degraded
    pub degraded_after: u32,

    /// Namespace prepended to every store key
    pub key_prefix: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            rearm_cooldown_on_failed_probe: false,
            max_retries: 3,
            retry_delay_ms: 5000,
            retry_backoff_multiplier: 1.0,
            retry_max_delay_ms: 60_000,
            retry_jitter: 0.0,
            counter_ttl_secs: 3600,
            store_timeout_ms: 2000,
            job_timeout_ms: None,
            prefetch: 1,
            max_in_flight_per_job_type: None,
            degraded_after: 3,
            key_prefix: "jobgate".to_string(),
        }
    }
}

impl RouterConfig {
    /// Load from an optional TOML file and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let loaded: RouterConfig = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values that would make the breaker meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if self.cooldown_secs == 0 {
            return Err(invalid("cooldown_secs", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(invalid("retry_jitter", "must be within 0.0..=1.0"));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(invalid("retry_backoff_multiplier", "must be at least 1.0"));
        }
        if self.retry_max_delay_ms < self.retry_delay_ms {
            return Err(invalid(
                "retry_max_delay_ms",
                "must not be lower than retry_delay_ms",
            ));
        }
        if self.counter_ttl_secs == 0 {
            return Err(invalid("counter_ttl_secs", "must be greater than 0"));
        }
        if self.store_timeout_ms == 0 {
            return Err(invalid("store_timeout_ms", "must be greater than 0"));
        }
        if self.prefetch == 0 {
            return Err(invalid("prefetch", "must be at least 1"));
        }
        if self.max_in_flight_per_job_type == Some(0) {
            return Err(invalid("max_in_flight_per_job_type", "must be at least 1"));
        }
        if self.key_prefix.is_empty() {
            return Err(invalid("key_prefix", "must not be empty"));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.counter_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    /// Delay before attempt number `attempt` (1-based) is redelivered
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        let policy = chrono_machines::Policy {
            max_attempts: self.max_retries.saturating_add(1).min(u8::MAX as u32) as _,
            base_delay_ms: self.retry_delay_ms,
            multiplier: self.retry_backoff_multiplier,
            max_delay_ms: self.retry_max_delay_ms,
        };
        let attempt = attempt.clamp(1, u8::MAX as u32);
        Duration::from_millis(policy.calculate_delay(attempt as _, self.retry_jitter) as u64)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = RouterConfig::default();

        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown(), Duration::from_secs(60));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(5000));
        assert_eq!(config.prefetch, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        let config = RouterConfig {
            failure_threshold: 0,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "failure_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_validation_rejects_out_of_range_jitter() {
        let config = RouterConfig {
            retry_jitter: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fixed_retry_delay_by_default() {
        let config = RouterConfig::default();

        for attempt in 1..=3 {
            assert_eq!(config.retry_delay_for(attempt), Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_exponential_retry_delay_is_capped() {
        let config = RouterConfig {
            retry_delay_ms: 1000,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_ms: 3000,
            ..Default::default()
        };

        let delays: Vec<Duration> = (1..=4).map(|a| config.retry_delay_for(a)).collect();

        assert_eq!(delays[0], Duration::from_millis(1000));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(3000)));
        assert!(delays[3] > delays[0]);
    }

    #[test]
    fn test_jittered_delay_stays_within_bounds() {
        let config = RouterConfig {
            retry_jitter: 1.0,
            ..Default::default()
        };

        for _ in 0..50 {
            assert!(config.retry_delay_for(1) <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "failure_threshold = 8\ncooldown_secs = 30\nkey_prefix = \"svc\""
        )
        .unwrap();

        let config = RouterConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.failure_threshold, 8);
        assert_eq!(config.cooldown_secs, 30);
        assert_eq!(config.key_prefix, "svc");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "prefetch = 0").unwrap();

        assert!(matches!(
            RouterConfig::load(Some(file.path())),
            Err(ConfigError::Invalid {
                field: "prefetch",
                ..
            })
        ));
    }
}
