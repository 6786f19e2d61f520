//! Utility modules: retry backoff, usage tracking, duration serialization.

pub mod retry;
pub mod serde_ms;
pub mod usage;
