//! Executor configuration (layered: code > TOML file > environment).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::stream_transform::MarkerGrammar;
use crate::util::retry::RetryPolicy;

/// Per-agent tunables for an [`ExecutionCoordinator`](crate::executor::ExecutionCoordinator).
///
/// ```
/// use std::time::Duration;
/// use remote_agents::config::ExecutorConfig;
///
/// let config = ExecutorConfig::builder()
///     .max_concurrent_requests(1)
///     .min_request_interval(Duration::from_secs(5))
///     .escalation_timeout_secs(300)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Minimum spacing between consecutive upstream calls.
    #[builder(default = Duration::from_millis(1000))]
    #[serde(rename = "min_request_interval_ms", with = "crate::util::serde_ms")]
    pub min_request_interval: Duration,
    /// Upstream calls allowed in flight at once.
    #[builder(default = 3)]
    pub max_concurrent_requests: usize,
    /// Call budget per window; 0 disables it.
    #[builder(default = 20)]
    pub max_calls_per_minute: u32,
    /// Length of the call-budget window.
    #[builder(default = Duration::from_secs(60))]
    #[serde(rename = "rate_window_ms", with = "crate::util::serde_ms")]
    pub rate_window: Duration,
    /// How long to wait for a human answer; `None` waits until answered or cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_timeout_secs: Option<u64>,
    /// Create a fresh upstream thread for every request.
    #[builder(default)]
    pub force_new_thread: bool,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub markers: MarkerGrammar,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExecutorConfig {
    pub fn escalation_timeout(&self) -> Option<Duration> {
        self.escalation_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_concurrent_requests == 0 {
            return Err(RelayError::Configuration(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RelayError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.rate_window.is_zero() {
            return Err(RelayError::Configuration(
                "rate_window_ms must be greater than zero".to_string(),
            ));
        }
        self.markers.validate()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RelayError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load from `{PREFIX}_*` environment variables over the defaults.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env(prefix: &str) -> Result<Self, RelayError> {
        let _ = dotenvy::dotenv();
        Self::default().with_overrides(prefix, |key| std::env::var(key).ok())
    }

    /// Apply `{PREFIX}_*` overrides read through `lookup`.
    pub fn with_overrides(
        mut self,
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RelayError> {
        let read = |name: &str| {
            let key = format!("{prefix}_{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some(ms) = parse(read("MIN_REQUEST_INTERVAL_MS"))? {
            self.min_request_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse(read("MAX_CONCURRENT_REQUESTS"))? {
            self.max_concurrent_requests = n;
        }
        if let Some(n) = parse(read("MAX_CALLS_PER_MINUTE"))? {
            self.max_calls_per_minute = n;
        }
        if let Some(secs) = parse(read("ESCALATION_TIMEOUT_SECONDS"))? {
            self.escalation_timeout_secs = Some(secs);
        }
        if let Some(flag) = parse(read("FORCE_NEW_THREAD"))? {
            self.force_new_thread = flag;
        }
        if let Some(n) = parse(read("RETRY_MAX_ATTEMPTS"))? {
            self.retry.max_attempts = n;
        }

        self.validate()?;
        Ok(self)
    }
}

fn parse<T: FromStr>(entry: Option<(String, String)>) -> Result<Option<T>, RelayError>
where
    T::Err: std::fmt::Display,
{
    let Some((key, value)) = entry else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e| RelayError::Configuration(format!("{key}={value:?}: {e}")))
}
