//! Engine configuration.
//!
//! [`QueueConfig`] is plain data with serde support so it can be embedded in
//! an application's own config file:
//!
//! ```yaml
//! workers: 4
//! max_retries: 3
//! backoff:
//!   exponential:
//!     base: 100ms
//!     max: 2s
//! default_ttl: 5m
//! base_url: https://api.example.com
//! ```

use std::time::Duration;

use bounded_integer::bounded_integer;
use serde::{Deserialize, Serialize};

bounded_integer! {
    /// Size of the worker pool (1-64).
    #[repr(u8)]
    pub struct WorkerCount { 1..=64 }
}

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 3;
/// Default retry bound for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default auto-fill recursion bound.
pub const DEFAULT_MAX_AUTOFILL_DEPTH: u8 = 4;
/// Default prefix for relative request URLs.
pub const DEFAULT_BASE_URL: &str = "https://etilbudsavis.dk";

/// Delay between retries of a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Constant {
        /// Delay before each retry.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// `base * attempt`, capped at `max`.
    Linear {
        /// Delay before the first retry.
        #[serde(with = "humantime_serde")]
        base: Duration,
        /// Upper bound.
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential {
        /// Delay before the first retry.
        #[serde(with = "humantime_serde")]
        base: Duration,
        /// Upper bound.
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// No delay at all. Useful in tests.
    pub const fn none() -> Self {
        Backoff::Constant {
            delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Backoff::Constant { delay } => delay,
            Backoff::Linear { base, max } => base.saturating_mul(attempt).min(max),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Where listener callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// A single background task drains the delivery channel.
    #[default]
    Spawned,
    /// Nothing is delivered until the owner calls
    /// [`RequestQueue::deliver_pending`](crate::RequestQueue::deliver_pending).
    Manual,
}

/// Configuration of a [`RequestQueue`](crate::RequestQueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Worker pool size, [`DEFAULT_WORKERS`] when unset.
    pub workers: Option<WorkerCount>,
    /// Retries after the first attempt for transport errors and 5xx.
    pub max_retries: u32,
    /// Delay between retries.
    pub backoff: Backoff,
    /// TTL for cacheable responses whose request sets none.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Deepest auto-fill level that may still spawn children.
    pub max_autofill_depth: u8,
    /// Prefix for relative URLs.
    pub base_url: String,
    /// Per-attempt timeout enforced by the executor.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Delivery thread affinity.
    pub delivery: DeliveryMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            default_ttl: Duration::from_secs(60),
            max_autofill_depth: DEFAULT_MAX_AUTOFILL_DEPTH,
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Some(Duration::from_secs(30)),
            delivery: DeliveryMode::default(),
        }
    }
}

impl QueueConfig {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig =
            serde_saphyr::from_str(yaml).map_err(|err| ConfigError::Yaml(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http") {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an absolute http(s) url, got {:?}",
                self.base_url
            )));
        }
        if let Backoff::Linear { base, max } | Backoff::Exponential { base, max } = self.backoff
            && base > max
        {
            return Err(ConfigError::Invalid(
                "backoff base exceeds its max".to_owned(),
            ));
        }
        Ok(())
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers
            .map(|workers| usize::from(workers.get()))
            .unwrap_or(DEFAULT_WORKERS)
    }

    /// Sets the worker count, clamped into 1..=64.
    pub fn with_workers(mut self, workers: u8) -> Self {
        self.workers = WorkerCount::new(workers.clamp(1, 64));
        self
    }

    /// Sets the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the retry backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the auto-fill depth bound.
    pub fn with_max_autofill_depth(mut self, depth: u8) -> Self {
        self.max_autofill_depth = depth;
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets or clears the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Invalid configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("invalid configuration document: {0}")]
    Yaml(String),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_url, "https://etilbudsavis.dk");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
workers: 5
max_retries: 4
backoff:
  linear:
    base: 100ms
    max: 1s
default_ttl: 5m
max_autofill_depth: 2
base_url: https://api.example.com
timeout: 10s
delivery: manual
"#;
        let config = QueueConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.worker_count(), 5);
        assert_eq!(config.max_retries, 4);
        assert_eq!(
            config.backoff,
            Backoff::Linear {
                base: Duration::from_millis(100),
                max: Duration::from_secs(1),
            }
        );
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.max_autofill_depth, 2);
        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.delivery, DeliveryMode::Manual);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = QueueConfig::from_yaml("max_retries: 0\n").unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.backoff, Backoff::default());
    }

    #[test]
    fn test_worker_count_out_of_range_is_rejected() {
        assert!(matches!(
            QueueConfig::from_yaml("workers: 0\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            QueueConfig::from_yaml("workers: 65\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_relative_base_url_is_rejected() {
        assert!(matches!(
            QueueConfig::from_yaml("base_url: /v2\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_backoff_delays() {
        let exponential = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(exponential.delay(1), Duration::from_millis(100));
        assert_eq!(exponential.delay(2), Duration::from_millis(200));
        assert_eq!(exponential.delay(3), Duration::from_millis(400));
        assert_eq!(exponential.delay(4), Duration::from_millis(500));
        assert_eq!(exponential.delay(100), Duration::from_millis(500));

        let linear = Backoff::Linear {
            base: Duration::from_millis(100),
            max: Duration::from_millis(250),
        };
        assert_eq!(linear.delay(2), Duration::from_millis(200));
        assert_eq!(linear.delay(3), Duration::from_millis(250));

        assert_eq!(Backoff::none().delay(7), Duration::ZERO);
    }
}
