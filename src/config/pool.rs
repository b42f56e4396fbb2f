//! Pool and scheduler configuration structures.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::dispatcher::BandThresholds;

/// Prefix of the environment variables read by [`PoolConfig::from_env`].
pub const ENV_PREFIX: &str = "JOB_POOL_";

/// Worker pool configuration.
///
/// Durations are stored as milliseconds so the struct serializes cleanly to
/// JSON; use the accessor methods to get [`Duration`]s.
///
/// # Example
///
/// ```
/// use prometheus_job_engine::config::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_workers(1, 8, 2)
///     .with_queue_capacity(64)
///     .with_default_job_timeout_ms(5_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Lower worker bound.
    pub min_workers: usize,
    /// Upper worker bound.
    pub max_workers: usize,
    /// Workers spawned by `start()`.
    pub initial_workers: usize,
    /// Capacity of each priority band.
    pub queue_capacity: usize,
    /// Timeout for jobs that do not carry their own.
    pub default_job_timeout_ms: u64,
    /// How long `stop()` waits for workers.
    pub shutdown_grace_period_ms: u64,
    /// How long `submit()` blocks on a full band. Zero fails immediately.
    pub submission_timeout_ms: u64,
    /// Whether metrics are recorded.
    pub metrics_enabled: bool,
    /// Gauge sampling period.
    pub metrics_interval_ms: u64,
    /// Autoscale evaluation period. Zero disables autoscaling.
    pub autoscale_interval_ms: u64,
    /// Lowest priority routed to the high band.
    pub high_priority_threshold: i32,
    /// Lowest priority routed to the medium band.
    pub medium_priority_threshold: i32,
    /// Stack size of worker threads in bytes.
    pub thread_stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        let thresholds = BandThresholds::default();
        Self {
            min_workers: 1,
            max_workers: cpus * 2,
            initial_workers: cpus,
            queue_capacity: 1024,
            default_job_timeout_ms: 30_000,
            shutdown_grace_period_ms: 10_000,
            submission_timeout_ms: 5_000,
            metrics_enabled: true,
            metrics_interval_ms: 1_000,
            autoscale_interval_ms: 5_000,
            high_priority_threshold: thresholds.high,
            medium_priority_threshold: thresholds.medium,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl PoolConfig {
    /// Set worker bounds and the initial count.
    #[must_use]
    pub const fn with_workers(mut self, min: usize, max: usize, initial: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self.initial_workers = initial;
        self
    }

    /// Set the per-band capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the default job timeout.
    #[must_use]
    pub const fn with_default_job_timeout_ms(mut self, ms: u64) -> Self {
        self.default_job_timeout_ms = ms;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace_period_ms(mut self, ms: u64) -> Self {
        self.shutdown_grace_period_ms = ms;
        self
    }

    /// Set the submission timeout.
    #[must_use]
    pub const fn with_submission_timeout_ms(mut self, ms: u64) -> Self {
        self.submission_timeout_ms = ms;
        self
    }

    /// Enable or disable metrics.
    #[must_use]
    pub const fn with_metrics(mut self, enabled: bool, interval_ms: u64) -> Self {
        self.metrics_enabled = enabled;
        self.metrics_interval_ms = interval_ms;
        self
    }

    /// Set the autoscale period (zero disables).
    #[must_use]
    pub const fn with_autoscale_interval_ms(mut self, ms: u64) -> Self {
        self.autoscale_interval_ms = ms;
        self
    }

    /// Set the band thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, high: i32, medium: i32) -> Self {
        self.high_priority_threshold = high;
        self.medium_priority_threshold = medium;
        self
    }

    /// Default job timeout.
    #[must_use]
    pub const fn default_job_timeout(&self) -> Duration {
        Duration::from_millis(self.default_job_timeout_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    /// Submission timeout.
    #[must_use]
    pub const fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    /// Metrics sampling period.
    #[must_use]
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// Autoscale period, `None` when disabled.
    #[must_use]
    pub const fn autoscale_interval(&self) -> Option<Duration> {
        if self.autoscale_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.autoscale_interval_ms))
        }
    }

    /// Band thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> BandThresholds {
        BandThresholds {
            high: self.high_priority_threshold,
            medium: self.medium_priority_threshold,
        }
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.min_workers > self.max_workers {
            return Err(format!(
                "min_workers ({}) must not exceed max_workers ({})",
                self.min_workers, self.max_workers
            ));
        }
        if self.initial_workers < self.min_workers || self.initial_workers > self.max_workers {
            return Err(format!(
                "initial_workers ({}) must be within [{}, {}]",
                self.initial_workers, self.min_workers, self.max_workers
            ));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.default_job_timeout_ms == 0 {
            return Err("default_job_timeout_ms must be greater than 0".into());
        }
        if self.metrics_enabled && self.metrics_interval_ms == 0 {
            return Err("metrics_interval_ms must be greater than 0".into());
        }
        if self.high_priority_threshold <= self.medium_priority_threshold {
            return Err(format!(
                "high_priority_threshold ({}) must be greater than medium_priority_threshold ({})",
                self.high_priority_threshold, self.medium_priority_threshold
            ));
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Build a configuration from `JOB_POOL_*` environment variables, loading
    /// a `.env` file first if present. Unset variables keep their defaults.
    ///
    /// Recognised variables: `JOB_POOL_MIN_WORKERS`, `JOB_POOL_MAX_WORKERS`,
    /// `JOB_POOL_INITIAL_WORKERS`, `JOB_POOL_QUEUE_CAPACITY`,
    /// `JOB_POOL_DEFAULT_JOB_TIMEOUT_MS`, `JOB_POOL_SHUTDOWN_GRACE_PERIOD_MS`,
    /// `JOB_POOL_SUBMISSION_TIMEOUT_MS`, `JOB_POOL_METRICS_ENABLED`,
    /// `JOB_POOL_METRICS_INTERVAL_MS`, `JOB_POOL_AUTOSCALE_INTERVAL_MS`,
    /// `JOB_POOL_HIGH_PRIORITY_THRESHOLD`, `JOB_POOL_MEDIUM_PRIORITY_THRESHOLD`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable fails to parse or the result is invalid.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PoolConfig::from_env`] but reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails to parse or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        override_with(&get, "MIN_WORKERS", &mut cfg.min_workers)?;
        override_with(&get, "MAX_WORKERS", &mut cfg.max_workers)?;
        override_with(&get, "INITIAL_WORKERS", &mut cfg.initial_workers)?;
        override_with(&get, "QUEUE_CAPACITY", &mut cfg.queue_capacity)?;
        override_with(&get, "DEFAULT_JOB_TIMEOUT_MS", &mut cfg.default_job_timeout_ms)?;
        override_with(&get, "SHUTDOWN_GRACE_PERIOD_MS", &mut cfg.shutdown_grace_period_ms)?;
        override_with(&get, "SUBMISSION_TIMEOUT_MS", &mut cfg.submission_timeout_ms)?;
        override_with(&get, "METRICS_ENABLED", &mut cfg.metrics_enabled)?;
        override_with(&get, "METRICS_INTERVAL_MS", &mut cfg.metrics_interval_ms)?;
        override_with(&get, "AUTOSCALE_INTERVAL_MS", &mut cfg.autoscale_interval_ms)?;
        override_with(&get, "HIGH_PRIORITY_THRESHOLD", &mut cfg.high_priority_threshold)?;
        override_with(&get, "MEDIUM_PRIORITY_THRESHOLD", &mut cfg.medium_priority_threshold)?;

        // Only max given: keep the other bounds consistent with it.
        if get("INITIAL_WORKERS").is_none() {
            cfg.initial_workers = cfg.initial_workers.clamp(cfg.min_workers, cfg.max_workers.max(cfg.min_workers));
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_with<T, G>(get: &G, name: &str, slot: &mut T) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{ENV_PREFIX}{name}: invalid value `{raw}`: {e}"))?;
    }
    Ok(())
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl SchedulerConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns the first pool error, prefixed with the pool name.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or invalid values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
