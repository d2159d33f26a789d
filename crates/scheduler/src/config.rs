//! Scheduler configuration.
//!
//! Parsed from `fahrplan.toml` with support for `FAHRPLAN_*` environment
//! variable overrides. Every knob has a serde default so a missing file or
//! an empty `[scheduler]` table yields a usable configuration.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::strategy::StrategyKind;

/// Full configuration for a [`crate::TaskScheduler`](crate::TaskScheduler).
///
/// Durations are stored as plain seconds/milliseconds fields so the TOML
/// surface stays flat; typed accessors convert to [`Duration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the bounded execution pool (concurrent in-flight tasks).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum retry attempts per task after the initial failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Whether failed tasks are resubmitted with backoff.
    #[serde(default = "default_auto_retry")]
    pub auto_retry: bool,

    /// Base delay for exponential retry backoff (`base * 2^retry_count`).
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: f64,

    /// A worker whose heartbeat is older than this is deactivated.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: f64,

    /// Scheduling loop tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Optional bound on how long a task may sit queued before it is failed.
    /// Unset means tasks wait indefinitely for capacity.
    #[serde(default)]
    pub max_queue_wait_secs: Option<f64>,

    /// Maximum time `shutdown` waits for in-flight tasks to drain.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: f64,

    /// Worker-selection policy.
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
}

fn default_max_workers() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_auto_retry() -> bool {
    true
}

fn default_retry_base_delay_secs() -> f64 {
    5.0
}

fn default_heartbeat_timeout_secs() -> f64 {
    60.0
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> f64 {
    5.0
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Priority
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            auto_retry: default_auto_retry(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            max_queue_wait_secs: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            strategy: default_strategy(),
        }
    }
}

impl SchedulerConfig {
    /// Load from a TOML file, apply env overrides, and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string and validate. Env overrides are not applied;
    /// use [`SchedulerConfig::apply_env_overrides`] or [`SchedulerConfig::from_path`].
    pub fn from_toml_str(raw: &str) -> Result<Self, SchedulerError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FAHRPLAN_*` environment variable overrides in place.
    ///
    /// Unparseable values are ignored in favor of the existing setting.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("FAHRPLAN_MAX_WORKERS") {
            self.max_workers = v;
        }
        if let Some(v) = env_parse::<u32>("FAHRPLAN_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse::<bool>("FAHRPLAN_AUTO_RETRY") {
            self.auto_retry = v;
        }
        if let Some(v) = env_parse::<f64>("FAHRPLAN_RETRY_BASE_DELAY_SECS") {
            self.retry_base_delay_secs = v;
        }
        if let Some(v) = env_parse::<f64>("FAHRPLAN_HEARTBEAT_TIMEOUT_SECS") {
            self.heartbeat_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("FAHRPLAN_TICK_INTERVAL_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse::<f64>("FAHRPLAN_MAX_QUEUE_WAIT_SECS") {
            self.max_queue_wait_secs = Some(v);
        }
        if let Some(v) = env_parse::<f64>("FAHRPLAN_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs = v;
        }
        if let Ok(v) = env::var("FAHRPLAN_STRATEGY") {
            if let Ok(kind) = v.parse::<StrategyKind>() {
                self.strategy = kind;
            }
        }
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_workers == 0 {
            return Err(SchedulerError::Config(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(SchedulerError::Config(
                "tick_interval_ms must be at least 1".into(),
            ));
        }
        if !self.retry_base_delay_secs.is_finite() || self.retry_base_delay_secs < 0.0 {
            return Err(SchedulerError::Config(
                "retry_base_delay_secs must be a non-negative number".into(),
            ));
        }
        if !self.heartbeat_timeout_secs.is_finite() || self.heartbeat_timeout_secs <= 0.0 {
            return Err(SchedulerError::Config(
                "heartbeat_timeout_secs must be positive".into(),
            ));
        }
        if !self.shutdown_timeout_secs.is_finite() || self.shutdown_timeout_secs < 0.0 {
            return Err(SchedulerError::Config(
                "shutdown_timeout_secs must be a non-negative number".into(),
            ));
        }
        if let Some(wait) = self.max_queue_wait_secs {
            if !wait.is_finite() || wait <= 0.0 {
                return Err(SchedulerError::Config(
                    "max_queue_wait_secs must be positive when set".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_base_delay_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_queue_wait(&self) -> Option<Duration> {
        self.max_queue_wait_secs.map(Duration::from_secs_f64)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
