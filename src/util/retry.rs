//! Exponential backoff with optional jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for transient upstream rate limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    #[serde(rename = "initial_backoff_ms", with = "crate::util::serde_ms")]
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff.
    #[serde(rename = "max_backoff_ms", with = "crate::util::serde_ms")]
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Spread each delay over 75%–125% of its nominal value.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` (zero-based) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Nominal backoff after the zero-based `attempt` failed:
    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Delay to sleep before the next attempt.
    ///
    /// Never shorter than the upstream's `retry_after_ms` hint.
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let nominal = self.backoff_for(attempt);
        let delay = if self.jitter {
            let jitter_factor = 0.75 + (rand_factor() * 0.5);
            Duration::from_secs_f64(nominal.as_secs_f64() * jitter_factor)
        } else {
            nominal
        };
        match retry_after_ms {
            Some(hint) => delay.max(Duration::from_millis(hint)),
            None => delay,
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
