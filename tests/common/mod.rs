//! Shared test helpers: scripted turns, coordinator setup, status draining.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use remote_agents::prelude::*;
use remote_agents::util::retry::RetryPolicy;

pub type Updates = UnboundedReceiverStream<TaskStatusUpdate>;

/// Config with no spacing, no budget and deterministic 1s/2s/4s backoff.
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig::builder()
        .min_request_interval(Duration::ZERO)
        .max_calls_per_minute(0)
        .retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: false,
        })
        .build()
}

pub fn coordinator(
    upstream: &Arc<ScriptedUpstream>,
    config: ExecutorConfig,
) -> Arc<ExecutionCoordinator> {
    Arc::new(ExecutionCoordinator::from_config(upstream.clone(), config).unwrap())
}

/// A complete assistant message.
pub fn reply(text: &str) -> Vec<RawUpstreamEvent> {
    vec![
        RawUpstreamEvent::text(text),
        RawUpstreamEvent::MessageCompleted,
        RawUpstreamEvent::Done,
    ]
}

/// Run `request` on its own task and return the handle with the status stream.
pub fn spawn(coordinator: &Arc<ExecutionCoordinator>, request: TurnRequest) -> (TaskHandle, Updates) {
    let (sink, updates) = ChannelSink::new(&request.task_id, &request.context_id);
    let handle = coordinator.spawn(request, Arc::new(sink));
    (handle, updates)
}

/// Read updates up to and including the first one in `state`.
pub async fn until_state(updates: &mut Updates, state: TaskState) -> Vec<TaskStatusUpdate> {
    let mut seen = Vec::new();
    while let Some(update) = updates.next().await {
        let matched = update.state() == state;
        seen.push(update);
        if matched {
            return seen;
        }
    }
    panic!("status stream ended before {state}; saw {seen:?}");
}

/// Read every remaining update; the sink must have been dropped.
pub async fn drain(updates: Updates) -> Vec<TaskStatusUpdate> {
    updates.collect().await
}

/// `(state, text)` pairs for compact assertions.
pub fn transitions(updates: &[TaskStatusUpdate]) -> Vec<(TaskState, Option<String>)> {
    updates
        .iter()
        .map(|u| (u.state(), u.text().map(str::to_string)))
        .collect()
}

pub fn working(text: &str) -> (TaskState, Option<String>) {
    (TaskState::Working, Some(text.to_string()))
}
