//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Upstream quota exhausted; retry after backoff.
    RateLimit,
    /// Upstream thread has an active run that will not finish; recreate the thread.
    ThreadStuck,
    /// The upstream reported a failure in-band. Not retried.
    Logical,
    Escalation,
    Cancellation,
    Configuration,
    Internal,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    RecreateThread,
    CheckConfiguration,
    Surface,
}

impl ErrorCategory {
    /// Recovery the coordinator applies for this category.
    pub fn recovery(self) -> RecoverySuggestion {
        match self {
            Self::RateLimit => RecoverySuggestion::RetryWithBackoff,
            Self::ThreadStuck => RecoverySuggestion::RecreateThread,
            Self::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::Surface,
        }
    }
}
