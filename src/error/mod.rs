//! Error types for the coordinator and its upstream adapters.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Error returned by an upstream adapter.
///
/// Adapters classify failures when they parse the vendor response, so the
/// coordinator can branch on [`UpstreamError::category`] instead of matching
/// on error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Thread {thread_id} has an active run that cannot be resolved")]
    ThreadStuck { thread_id: String },

    #[error("Upstream API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Failed(String),
}

impl UpstreamError {
    /// Build an error from an HTTP status returned by the upstream.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after_ms: None,
            },
            _ => Self::Api {
                status,
                message: message.into(),
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::ThreadStuck { .. } => ErrorCategory::ThreadStuck,
            Self::Api { status: 429, .. } => ErrorCategory::RateLimit,
            Self::Api { .. } | Self::Failed(_) => ErrorCategory::Logical,
        }
    }

    /// Retry hint supplied by the upstream, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Primary error type for all coordinator operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Upstream rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("An escalation is already pending for context {context_id}")]
    DuplicateEscalation { context_id: String },

    #[error("Timed out after {timeout_ms}ms waiting for human input on context {context_id}")]
    EscalationTimeout { context_id: String, timeout_ms: u64 },

    #[error("Task cancelled while waiting for human input on context {context_id}")]
    EscalationCancelled { context_id: String },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task sink error: {0}")]
    Sink(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid marker pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl RelayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Upstream(e) => e.category(),
            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            Self::DuplicateEscalation { .. } | Self::EscalationTimeout { .. } => {
                ErrorCategory::Escalation
            }
            Self::EscalationCancelled { .. } | Self::Cancelled => ErrorCategory::Cancellation,
            Self::Configuration(_) | Self::ConfigParse(_) | Self::Pattern(_) => {
                ErrorCategory::Configuration
            }
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether the task ended because somebody cancelled it.
    pub fn is_cancellation(&self) -> bool {
        self.category() == ErrorCategory::Cancellation
    }

    /// Text carried by the `Failed` status for this error.
    pub fn failure_message(&self) -> String {
        if self.is_cancellation() {
            return "task cancelled".to_string();
        }
        self.to_string()
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_maps_to_rate_limit() {
        let err = UpstreamError::from_status(429, "slow down");
        assert_eq!(err, UpstreamError::RateLimited { retry_after_ms: None });
        assert_eq!(err.category(), ErrorCategory::RateLimit);
        assert_eq!(err.category().recovery(), RecoverySuggestion::RetryWithBackoff);
    }

    #[test]
    fn other_statuses_are_logical_failures() {
        let err = UpstreamError::from_status(500, "boom");
        assert_eq!(err.category(), ErrorCategory::Logical);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn stuck_thread_recovers_by_recreation() {
        let err = UpstreamError::ThreadStuck {
            thread_id: "thread-9".into(),
        };
        assert_eq!(err.category().recovery(), RecoverySuggestion::RecreateThread);
        assert!(err.to_string().contains("thread-9"));
    }

    #[test]
    fn upstream_failure_message_is_passed_through() {
        let err = RelayError::from(UpstreamError::Failed("tool crm_lookup failed".into()));
        assert_eq!(err.failure_message(), "tool crm_lookup failed");
        assert!(!err.is_cancellation());
    }

    #[test]
    fn cancellation_has_distinct_message() {
        let direct = RelayError::Cancelled;
        let escalation = RelayError::EscalationCancelled {
            context_id: "ctx".into(),
        };
        assert!(direct.is_cancellation());
        assert!(escalation.is_cancellation());
        assert_eq!(direct.failure_message(), "task cancelled");
        assert_eq!(escalation.failure_message(), "task cancelled");
    }

    #[test]
    fn escalation_errors_share_a_category() {
        let dup = RelayError::DuplicateEscalation {
            context_id: "ctx".into(),
        };
        let timeout = RelayError::EscalationTimeout {
            context_id: "ctx".into(),
            timeout_ms: 1000,
        };
        assert_eq!(dup.category(), ErrorCategory::Escalation);
        assert_eq!(timeout.category(), ErrorCategory::Escalation);
        assert!(timeout.failure_message().contains("1000ms"));
    }
}
