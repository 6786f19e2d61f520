//! Upstream conversation runtime abstraction.
//!
//! An upstream is any LLM or tool runtime that keeps conversation state in a
//! thread (Foundry agents, the Responses API, ...). Adapters implement
//! [`UpstreamConversationClient`] and normalize the vendor's events into
//! [`RawUpstreamEvent`]s at this boundary.

pub mod scripted;

pub use scripted::{ScriptedTurn, ScriptedUpstream, TurnCall};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::UpstreamError;
use crate::types::RawUpstreamEvent;

/// Raw event stream for one turn.
pub type RawEventStream = BoxStream<'static, Result<RawUpstreamEvent, UpstreamError>>;

/// Client for an upstream conversational runtime.
///
/// Rate limits and stuck threads must be reported as
/// [`UpstreamError::RateLimited`] and [`UpstreamError::ThreadStuck`], either
/// from `run_turn` itself or as an error item in the stream.
#[async_trait]
pub trait UpstreamConversationClient: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Create a new conversation thread and return its id.
    async fn create_thread(&self) -> Result<String, UpstreamError>;

    /// Submit `input` to `thread_id` and stream the resulting run.
    async fn run_turn(&self, thread_id: &str, input: &str)
        -> Result<RawEventStream, UpstreamError>;
}
