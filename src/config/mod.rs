//! Process configuration, loaded from environment variables with `figment`.
//!
//! Durations accept `fundu` syntax (`10s`, `1500ms`, `2m`); a bare number is
//! read as seconds.

use figment::{Figment, providers::Env};
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::cache::LockOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Sent as a bearer token when present; GitHub allows a few unauthenticated searches too.
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Outgoing search requests per minute, per process.
    #[serde(default = "default_github_rate_limit")]
    pub github_rate_limit: NonZeroU32,

    /// Shared store. Without it the service falls back to a process-local store.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(
        default = "default_cache_lock_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_lock_timeout: Duration,
    #[serde(
        default = "default_cache_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_poll_interval: Duration,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub cache_max_wait: Option<Duration>,

    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(Figment::new().merge(Env::raw()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            lease: self.cache_lock_timeout,
            poll_interval: self.cache_poll_interval,
            max_wait: self.cache_max_wait,
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

const DEFAULT_GITHUB_RATE_LIMIT: NonZeroU32 = NonZeroU32::new(30).unwrap();

fn default_github_rate_limit() -> NonZeroU32 {
    DEFAULT_GITHUB_RATE_LIMIT
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

fn default_cache_lock_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_cache_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Environment values arrive as integers or strings depending on how figment
/// reads them.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn parse_duration(raw: RawDuration) -> Result<Duration, String> {
    match raw {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => {
            let text = text.trim();
            if let Ok(secs) = text.parse::<u64>() {
                return Ok(Duration::from_secs(secs));
            }
            let parsed = fundu::parse_duration(text)
                .map_err(|e| format!("invalid duration '{text}': {e}"))?;
            parsed
                .try_into()
                .map_err(|e| format!("duration '{text}' out of range: {e}"))
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RawDuration::deserialize(deserializer)?;
    parse_duration(raw).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(parse_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, figment::Error> {
        let mut figment = Figment::new();
        for (k, v) in pairs {
            figment = figment.merge(Serialized::default(k, v));
        }
        Config::from_figment(figment)
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_figment(Figment::new()).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.lock_options(), LockOptions::default());
        assert!(config.redis_url.is_none());
        assert_eq!(config.github_rate_limit.get(), 30);
    }

    #[test]
    fn durations_accept_units_and_bare_seconds() {
        let config = from_pairs(&[
            ("cache_lock_timeout", "1500ms"),
            ("cache_poll_interval", "50ms"),
            ("cache_max_wait", "2m"),
            ("shutdown_timeout", "3"),
        ])
        .unwrap();
        assert_eq!(config.cache_lock_timeout, Duration::from_millis(1500));
        assert_eq!(config.cache_poll_interval, Duration::from_millis(50));
        assert_eq!(config.cache_max_wait, Some(Duration::from_secs(120)));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn integer_duration_is_seconds() {
        let figment = Figment::new().merge(Serialized::default("cache_lock_timeout", 4u64));
        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.cache_lock_timeout, Duration::from_secs(4));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        assert!(from_pairs(&[("cache_poll_interval", "soon")]).is_err());
    }
}
