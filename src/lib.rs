//! Remote agents: execution coordinator for A2A agents.
//!
//! Wraps a streaming LLM or tool runtime behind the A2A task protocol. One
//! [`executor::ExecutionCoordinator`] per agent process gates upstream calls
//! through a shared [`limiter::RateLimiter`], maps conversation contexts to
//! upstream threads, translates the upstream event stream into task status
//! updates, and pauses for human input when the model asks for it.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use remote_agents::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(client: Arc<dyn UpstreamConversationClient>) -> remote_agents::error::Result<()> {
//! let coordinator = ExecutionCoordinator::from_config(client, ExecutorConfig::default())?;
//! let request = TurnRequest::new("ctx-1", "What is the capital of France?");
//! let (sink, _updates) = ChannelSink::new(&request.task_id, &request.context_id);
//! let outcome = coordinator.run(request, &sink, CancellationToken::new()).await;
//! println!("{}: {}", outcome.state, outcome.message);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod hitl;
pub mod limiter;
pub mod prelude;
pub mod sink;
pub mod stream_transform;
pub mod threads;
pub mod types;
pub mod upstream;
pub mod util;
