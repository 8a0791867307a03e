//! Runtime configuration of the resolver and of job monitoring.
//!
//! The configuration is loaded once at process start (from an optional TOML file, with a few
//! values overridable through environment variables) and then passed by reference to the
//! components that need it.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::error::FarlaunchError;

/// Prefix of environment variable names that are reserved for values injected by farlaunch.
pub const DEFAULT_RESERVED_ENV_PREFIX: &str = "FARLAUNCH_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub resolver: ResolverConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Environment variables starting with this prefix cannot be defined by any layer.
    pub reserved_env_prefix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            reserved_env_prefix: DEFAULT_RESERVED_ENV_PREFIX.to_string(),
        }
    }
}

/// One step of the polling schedule: `polls` status checks spaced by `interval`.
/// A step without `polls` is used indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollStep {
    #[serde(default)]
    pub polls: Option<u32>,
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,
}

impl PollStep {
    pub fn new(polls: Option<u32>, interval: Duration) -> Self {
        Self { polls, interval }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Polling schedule, the intervals usually grow as the job keeps running.
    pub steps: Vec<PollStep>,
    /// Monitoring gives up after this much time has passed since it has started.
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub max_elapsed: Duration,
    /// Monitoring gives up after this many status checks have failed in a row.
    pub max_consecutive_failures: u32,
    /// How many times can a status check that found no trace of the remote job be repeated
    /// without being counted as a failure. Covers the window right after submission, in which
    /// the remote system does not know about the job yet.
    pub initial_queuing_retries: u32,
    /// Keep the remote connection open between status checks.
    pub keep_connection: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                PollStep::new(Some(12), Duration::from_secs(5)),
                PollStep::new(Some(12), Duration::from_secs(10)),
                PollStep::new(Some(60), Duration::from_secs(30)),
                PollStep::new(None, Duration::from_secs(60)),
            ],
            max_elapsed: Duration::from_secs(7 * 24 * 60 * 60),
            max_consecutive_failures: 10,
            initial_queuing_retries: 3,
            keep_connection: true,
        }
    }
}

const ENV_MAX_ELAPSED: &str = "FARLAUNCH_MONITOR_MAX_ELAPSED_MS";
const ENV_MAX_FAILURES: &str = "FARLAUNCH_MONITOR_MAX_FAILURES";
const ENV_KEEP_CONNECTION: &str = "FARLAUNCH_MONITOR_KEEP_CONNECTION";
const ENV_RESERVED_PREFIX: &str = "FARLAUNCH_RESERVED_ENV_PREFIX";

impl RuntimeConfig {
    /// Loads the configuration from a TOML file and applies overrides from the process
    /// environment.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            FarlaunchError::ConfigError(format!(
                "Cannot read configuration file {}: {error}",
                path.display()
            ))
        })?;
        let mut config = Self::parse(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with overrides from the process environment.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(value) = parse_env(&lookup, ENV_MAX_ELAPSED) {
            self.monitor.max_elapsed = Duration::from_millis(value);
        }
        if let Some(value) = parse_env(&lookup, ENV_MAX_FAILURES) {
            self.monitor.max_consecutive_failures = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_KEEP_CONNECTION) {
            self.monitor.keep_connection = value;
        }
        if let Some(value) = lookup(ENV_RESERVED_PREFIX) {
            self.resolver.reserved_env_prefix = value;
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        let steps = &self.monitor.steps;
        if steps.is_empty() {
            return Err(FarlaunchError::ConfigError(
                "monitor.steps must contain at least one polling step".to_string(),
            ));
        }
        if steps.iter().any(|step| step.polls == Some(0)) {
            return Err(FarlaunchError::ConfigError(
                "monitor.steps cannot contain a step with zero polls".to_string(),
            ));
        }
        if self.resolver.reserved_env_prefix.is_empty() {
            return Err(FarlaunchError::ConfigError(
                "resolver.reserved_env_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<F: Fn(&str) -> Option<String>, T: std::str::FromStr>(
    lookup: &F,
    key: &str,
) -> Option<T> {
    let value = lookup(key)?;
    match value.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value `{value}` of environment variable {key}");
            None
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = String::deserialize(deserializer)?;
    humantime::parse_duration(&buf).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}
