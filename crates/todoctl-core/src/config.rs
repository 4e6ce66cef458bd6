//! Controller configuration.
//!
//! Loaded from TOML (every field optional) and then overridden from
//! `TODOCTL_*` environment variables.
//!
//! ```toml
//! workers = 2
//! fan_out = "indexed"
//! completed_requeue_after_secs = 120
//!
//! [periodic]
//! interval_secs = 5
//! max_ticks = 100
//! target_namespace = "operator-namespace"
//! target_name = "jack"
//!
//! [retry]
//! base_delay_ms = 5
//! max_delay_secs = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ObjectKey;
use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a Pod change is mapped to TodoList keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOut {
    /// Every Pod event re-evaluates every known TodoList.
    #[default]
    Broadcast,

    /// Pod events only re-evaluate TodoLists whose task names that Pod.
    Indexed,
}

impl std::str::FromStr for FanOut {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(FanOut::Broadcast),
            "indexed" => Ok(FanOut::Indexed),
            other => Err(other.to_string()),
        }
    }
}

/// Synthetic periodic trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "interval_secs", with = "duration_secs", default = "default_interval")]
    pub interval: Duration,

    /// Safety cap on the number of ticks.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    #[serde(default = "default_target_namespace")]
    pub target_namespace: String,

    #[serde(default = "default_target_name")]
    pub target_name: String,
}

impl PeriodicConfig {
    pub fn target(&self) -> ObjectKey {
        ObjectKey::new(self.target_namespace.clone(), self.target_name.clone())
    }
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            max_ticks: default_max_ticks(),
            target_namespace: default_target_namespace(),
            target_name: default_target_name(),
        }
    }
}

/// Backoff for failed reconciliations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "base_delay_ms", with = "duration_millis", default = "default_base_delay")]
    pub base_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(rename = "max_delay_secs", with = "duration_secs", default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default)]
    pub jitter: f64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_delay, self.multiplier, self.max_delay).with_jitter(self.jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of parallel reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Re-check interval for a completed TodoList.
    #[serde(
        rename = "completed_requeue_after_secs",
        with = "duration_secs",
        default = "default_completed_requeue_after"
    )]
    pub completed_requeue_after: Duration,

    /// Failures after which every further failure is reported at error level.
    #[serde(default = "default_report_after_attempts")]
    pub report_after_attempts: u32,

    #[serde(default)]
    pub fan_out: FanOut,

    /// Capacity of the fan-in channel between sources and the router.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub periodic: PeriodicConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            completed_requeue_after: default_completed_requeue_after(),
            report_after_attempts: default_report_after_attempts(),
            fan_out: FanOut::default(),
            event_buffer: default_event_buffer(),
            periodic: PeriodicConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `TODOCTL_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = lookup("TODOCTL_WORKERS") {
            self.workers = parse_env("TODOCTL_WORKERS", &value)?;
        }
        if let Some(value) = lookup("TODOCTL_PERIODIC_INTERVAL_SECS") {
            let secs: u64 = parse_env("TODOCTL_PERIODIC_INTERVAL_SECS", &value)?;
            self.periodic.interval = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("TODOCTL_PERIODIC_MAX_TICKS") {
            self.periodic.max_ticks = parse_env("TODOCTL_PERIODIC_MAX_TICKS", &value)?;
        }
        if let Some(value) = lookup("TODOCTL_FAN_OUT") {
            self.fan_out = parse_env("TODOCTL_FAN_OUT", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Upper bound accepted for every configured duration.
    pub const MAX_DURATION: Duration = Duration::from_secs(365 * 86_400);

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".into()));
        }
        if self.periodic.enabled && self.periodic.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "periodic.interval_secs must be positive".into(),
            ));
        }
        if self.completed_requeue_after.is_zero() {
            return Err(ConfigError::Invalid(
                "completed_requeue_after_secs must be positive".into(),
            ));
        }
        for (name, value) in [
            ("completed_requeue_after_secs", self.completed_requeue_after),
            ("periodic.interval_secs", self.periodic.interval),
            ("retry.base_delay_ms", self.retry.base_delay),
            ("retry.max_delay_secs", self.retry.max_delay),
        ] {
            if value > Self::MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{name} exceeds {}s",
                    Self::MAX_DURATION.as_secs()
                )));
            }
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_completed_requeue_after() -> Duration {
    Duration::from_secs(120)
}

fn default_report_after_attempts() -> u32 {
    10
}

fn default_event_buffer() -> usize {
    256
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_ticks() -> u64 {
    100
}

fn default_target_namespace() -> String {
    "operator-namespace".to_string()
}

fn default_target_name() -> String {
    "jack".to_string()
}

fn default_base_delay() -> Duration {
    Duration::from_millis(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(1000)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
