//! Convenience re-exports for common use.

pub use crate::config::ExecutorConfig;
pub use crate::error::{RelayError, Result, UpstreamError};
pub use crate::executor::{ExecutionCoordinator, TaskHandle, TaskOutcome, TurnRequest};
pub use crate::hitl::HitlCoordinator;
pub use crate::limiter::RateLimiter;
pub use crate::sink::{ChannelSink, TaskSink};
pub use crate::stream_transform::{MarkerGrammar, StreamTranslator};
pub use crate::threads::ThreadRegistry;
pub use crate::types::{
    Artifact, RawUpstreamEvent, StreamEvent, TaskMessage, TaskState, TaskStatusUpdate, Usage,
};
pub use crate::upstream::{RawEventStream, ScriptedUpstream, UpstreamConversationClient};
