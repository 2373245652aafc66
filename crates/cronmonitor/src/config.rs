use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Default CronMonitor endpoint.
pub const DEFAULT_BASE_URL: &str = "https://cronmonitor.app";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of ping attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Notifier configuration, loaded from the environment or embedded in a
/// caller's own config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotifierConfig {
    /// Ping token identifying the monitored job
    pub token: String,

    /// Monitoring service address, without the `/ping` path
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(
        default = "default_timeout",
        rename = "timeout_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub timeout: Duration,

    /// Total number of requests made before giving up
    #[serde(default = "default_max_attempts", alias = "retries")]
    pub max_attempts: u32,

    /// Log every attempt, backoff and outcome
    #[serde(default)]
    pub verbose: bool,
}

impl NotifierConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: default_base_url(),
            timeout: default_timeout(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            verbose: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is read first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("CRONMONITOR_TOKEN").ok_or(ConfigError::MissingEnv("CRONMONITOR_TOKEN"))?;

        let verbose = match lookup("CRONMONITOR_VERBOSE") {
            None => false,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidEnv {
                var: "CRONMONITOR_VERBOSE",
                value,
            })?,
        };

        Ok(Self {
            token,
            base_url: lookup("CRONMONITOR_BASE_URL").unwrap_or_else(default_base_url),
            timeout: Duration::from_secs(parse_var(
                &lookup,
                "CRONMONITOR_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            max_attempts: parse_var(&lookup, "CRONMONITOR_RETRIES", DEFAULT_MAX_ATTEMPTS)?,
            verbose,
        })
    }

    /// Check the construction contract. The token format itself is never
    /// inspected; a bad token just fails delivery.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// `<base_url>/ping/<token>`
    pub fn ping_url(&self) -> String {
        format!("{}/ping/{}", self.base_url.trim_end_matches('/'), self.token)
    }
}

/// Parse a boolean flag, accepting "1", "true", "yes", "on" and
/// "0", "false", "no", "off", "" (case-insensitive).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}
