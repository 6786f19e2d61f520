//! In-memory upstream that replays queued turns.
//!
//! Used by the test suite and for running an agent without a live runtime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use super::{RawEventStream, UpstreamConversationClient};
use crate::error::UpstreamError;
use crate::types::RawUpstreamEvent;

type RawItem = Result<RawUpstreamEvent, UpstreamError>;

/// What the next `run_turn` call does.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream these items, then end.
    Events(Vec<Result<RawUpstreamEvent, UpstreamError>>),
    /// Fail the call itself before any stream is returned.
    Reject(UpstreamError),
    /// Return a stream that never yields.
    Hang,
}

/// One recorded `run_turn` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCall {
    pub thread_id: String,
    pub input: String,
}

/// Upstream client driven by a queue of scripted turns.
///
/// Threads are named `thread-1`, `thread-2`, ... in creation order. When the
/// queue is empty a turn streams nothing.
pub struct ScriptedUpstream {
    name: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    calls: Mutex<Vec<TurnCall>>,
    thread_failures: Mutex<VecDeque<UpstreamError>>,
    threads_created: AtomicUsize,
}

impl Default for ScriptedUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self {
            name: "scripted".to_string(),
            turns: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            thread_failures: Mutex::new(VecDeque::new()),
            threads_created: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue a turn that streams `events` successfully.
    pub fn push_events(&self, events: Vec<RawUpstreamEvent>) -> &Self {
        self.push(ScriptedTurn::Events(events.into_iter().map(Ok).collect()))
    }

    /// Queue a turn whose `run_turn` call fails with `error`.
    pub fn push_rejection(&self, error: UpstreamError) -> &Self {
        self.push(ScriptedTurn::Reject(error))
    }

    pub fn push(&self, turn: ScriptedTurn) -> &Self {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(turn);
        self
    }

    /// Make the next `create_thread` call fail.
    pub fn fail_next_thread(&self, error: UpstreamError) {
        self.thread_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Every `run_turn` call made so far, in order.
    pub fn calls(&self) -> Vec<TurnCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamConversationClient for ScriptedUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_thread(&self) -> Result<String, UpstreamError> {
        if let Some(error) = self
            .thread_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(error);
        }
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("thread-{n}"))
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        input: &str,
    ) -> Result<RawEventStream, UpstreamError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(TurnCall {
                thread_id: thread_id.to_string(),
                input: input.to_string(),
            });

        let turn = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match turn {
            Some(ScriptedTurn::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(ScriptedTurn::Reject(error)) => Err(error),
            Some(ScriptedTurn::Hang) => Ok(stream::pending::<RawItem>().boxed()),
            None => Ok(stream::empty::<RawItem>().boxed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_turns_in_order_and_records_calls() {
        let upstream = ScriptedUpstream::new();
        upstream
            .push_events(vec![RawUpstreamEvent::text("one")])
            .push_rejection(UpstreamError::RateLimited {
                retry_after_ms: None,
            });

        let thread = upstream.create_thread().await.unwrap();
        assert_eq!(thread, "thread-1");

        let events: Vec<_> = upstream
            .run_turn(&thread, "hi")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events, vec![Ok(RawUpstreamEvent::text("one"))]);

        assert!(upstream.run_turn(&thread, "again").await.is_err());
        assert_eq!(
            upstream.calls(),
            vec![
                TurnCall {
                    thread_id: "thread-1".into(),
                    input: "hi".into()
                },
                TurnCall {
                    thread_id: "thread-1".into(),
                    input: "again".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn thread_failures_are_consumed_once() {
        let upstream = ScriptedUpstream::new();
        upstream.fail_next_thread(UpstreamError::Failed("quota".into()));

        assert!(upstream.create_thread().await.is_err());
        assert_eq!(upstream.create_thread().await.unwrap(), "thread-1");
        assert_eq!(upstream.threads_created(), 1);
    }
}
