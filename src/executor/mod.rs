//! Per-request orchestration.
//!
//! [`ExecutionCoordinator::run`] drives one request end to end: admission
//! through the shared [`RateLimiter`], thread resolution, the translated
//! upstream stream, human escalations, and the terminal status. Every path
//! out of `run` emits exactly one terminal status to the sink.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::error::{RecoverySuggestion, RelayError, UpstreamError};
use crate::hitl::HitlCoordinator;
use crate::limiter::{RateLimiter, RatePermit};
use crate::sink::{TaskSink, TaskUpdater};
use crate::stream_transform::{MarkerMatcher, StreamTranslator};
use crate::threads::ThreadRegistry;
use crate::types::{Artifact, StreamEvent, TaskMessage, TaskState, Usage};
use crate::upstream::UpstreamConversationClient;
use crate::util::usage::UsageTracker;

/// Prefix of the continuation input carrying a human answer.
pub const HUMAN_RESPONSE_PREFIX: &str = "[HUMAN RESPONSE]: ";

/// Completion text when a turn did work but never produced a reply.
pub const NO_TEXT_FALLBACK: &str = "The agent finished without producing a response.";

const RESUMING_MESSAGE: &str = "Human response received, resuming";

/// One inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub task_id: String,
    pub context_id: String,
    pub input: String,
}

impl TurnRequest {
    /// New request with a generated task id.
    pub fn new(context_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            input: input.into(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

/// Terminal result of a request, mirroring what was sent to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub context_id: String,
    pub state: TaskState,
    pub message: String,
    pub usage: Usage,
    pub artifacts: Vec<Artifact>,
    pub thread_id: Option<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Completed
    }
}

/// Handle to a request running on its own tokio task.
pub struct TaskHandle {
    task_id: String,
    context_id: String,
    cancel: CancellationToken,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Request cancellation; the task still emits its terminal `Failed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> TaskOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(join_error) => TaskOutcome {
                task_id: self.task_id,
                context_id: self.context_id,
                state: TaskState::Failed,
                message: RelayError::Internal(join_error.to_string()).failure_message(),
                usage: Usage::default(),
                artifacts: Vec::new(),
                thread_id: None,
            },
        }
    }
}

/// How one upstream turn ended.
#[derive(Debug)]
enum SegmentEnd {
    Final(String),
    Escalation(String),
    NoText,
}

/// Data gathered across every turn of one request.
#[derive(Debug, Default)]
struct TurnState {
    usage: Usage,
    artifacts: Vec<Artifact>,
    thread_id: Option<String>,
    /// Escalation this request has open, by generation id.
    escalation: Option<u64>,
}

impl TurnState {
    fn commit(&mut self, output: AttemptOutput) {
        self.usage.merge(&output.usage);
        self.artifacts.extend(output.artifacts);
    }
}

/// What one upstream attempt produced; dropped if the attempt is retried.
#[derive(Debug, Default)]
struct AttemptOutput {
    usage: Usage,
    artifacts: Vec<Artifact>,
    progress: Vec<String>,
}

/// Drives requests for one agent process.
pub struct ExecutionCoordinator {
    client: Arc<dyn UpstreamConversationClient>,
    limiter: Arc<RateLimiter>,
    threads: ThreadRegistry,
    hitl: HitlCoordinator,
    translator: StreamTranslator,
    config: ExecutorConfig,
    usage: UsageTracker,
}

impl ExecutionCoordinator {
    /// Build a coordinator around an existing, possibly shared, limiter.
    pub fn new(
        client: Arc<dyn UpstreamConversationClient>,
        limiter: Arc<RateLimiter>,
        config: ExecutorConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        let markers = MarkerMatcher::new(config.markers.clone())?;
        Ok(Self {
            threads: ThreadRegistry::new(client.clone()),
            client,
            limiter,
            hitl: HitlCoordinator::new(),
            translator: StreamTranslator::new(Arc::new(markers)),
            config,
            usage: UsageTracker::new(),
        })
    }

    /// Build a coordinator with its own limiter derived from `config`.
    pub fn from_config(
        client: Arc<dyn UpstreamConversationClient>,
        config: ExecutorConfig,
    ) -> Result<Self, RelayError> {
        let limiter = Arc::new(RateLimiter::from_config(&config));
        Self::new(client, limiter, config)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// Entry point for human answers (`submit_human_response`).
    pub fn hitl(&self) -> &HitlCoordinator {
        &self.hitl
    }

    /// Token usage accumulated across every finished request.
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Release every pending escalation and forget all thread mappings.
    pub async fn shutdown(&self) {
        let released = self.hitl.cancel_all();
        self.threads.clear().await;
        tracing::info!(released, upstream = self.client.name(), "coordinator shut down");
    }

    /// Run `request` on a new tokio task.
    pub fn spawn(self: &Arc<Self>, request: TurnRequest, sink: Arc<dyn TaskSink>) -> TaskHandle {
        let cancel = CancellationToken::new();
        let task_id = request.task_id.clone();
        let context_id = request.context_id.clone();
        let coordinator = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { coordinator.run(request, sink.as_ref(), token).await });
        TaskHandle {
            task_id,
            context_id,
            cancel,
            join,
        }
    }

    /// Drive `request` to a terminal state, reporting through `sink`.
    ///
    /// Never fails: cancellation, exhausted retries, upstream failures and
    /// panics all end as a `Failed` status.
    pub async fn run(
        &self,
        request: TurnRequest,
        sink: &dyn TaskSink,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let mut updater = TaskUpdater::new(sink, request.task_id.as_str());
        let mut turn = TurnState::default();
        tracing::info!(
            task_id = %request.task_id,
            context_id = %request.context_id,
            "task started"
        );
        updater.submit().await;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            driven = AssertUnwindSafe(self.drive(&request, &mut updater, &mut turn)).catch_unwind() => {
                match driven {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        tracing::error!(task_id = %request.task_id, reason = %reason, "task panicked");
                        Err(RelayError::Internal(format!("task panicked: {reason}")))
                    }
                }
            }
        };

        // Only this request's own escalation and thread are released; another
        // request on the same context keeps its state.
        if result.is_err() {
            if let Some(id) = turn.escalation.take() {
                self.hitl.withdraw(&request.context_id, id);
            }
        }
        if matches!(result, Err(ref e) if e.is_cancellation()) {
            if let Some(thread_id) = turn.thread_id.as_deref() {
                self.threads.evict_if(&request.context_id, thread_id).await;
            }
        }

        self.usage.record(&turn.usage);
        let metadata = serde_json::json!({
            "token_usage": turn.usage,
            "thread_id": turn.thread_id,
        });

        let (state, message) = match result {
            Ok(text) => {
                tracing::info!(task_id = %request.task_id, context_id = %request.context_id, "task completed");
                updater
                    .complete(
                        TaskMessage::text(text.as_str()).with_metadata(metadata),
                        turn.artifacts.clone(),
                    )
                    .await;
                (TaskState::Completed, text)
            }
            Err(error) => {
                let message = error.failure_message();
                tracing::info!(
                    task_id = %request.task_id,
                    context_id = %request.context_id,
                    category = %error.category(),
                    error = %error,
                    "task failed"
                );
                updater
                    .fail(TaskMessage::text(message.as_str()).with_metadata(metadata))
                    .await;
                (TaskState::Failed, message)
            }
        };

        TaskOutcome {
            task_id: request.task_id,
            context_id: request.context_id,
            state,
            message,
            usage: turn.usage,
            artifacts: turn.artifacts,
            thread_id: turn.thread_id,
        }
    }

    async fn drive(
        &self,
        request: &TurnRequest,
        updater: &mut TaskUpdater<'_>,
        turn: &mut TurnState,
    ) -> Result<String, RelayError> {
        let context_id = request.context_id.as_str();

        let permit = self.limiter.acquire().await;
        let mut thread_id = self
            .threads
            .resolve(context_id, self.config.force_new_thread)
            .await?;
        turn.thread_id = Some(thread_id.clone());
        updater.working(None).await;

        let mut input = request.input.clone();
        let mut permit = Some(permit);
        loop {
            let end = self
                .run_segment(request, &mut thread_id, &input, permit.take(), updater, turn)
                .await?;
            match end {
                SegmentEnd::Final(text) => return Ok(text),
                SegmentEnd::NoText => return Ok(NO_TEXT_FALLBACK.to_string()),
                SegmentEnd::Escalation(prompt) => {
                    let handle = self.hitl.request_escalation(context_id, &prompt)?;
                    turn.escalation = Some(handle.id());
                    updater.input_required(&prompt).await;
                    let answer = self
                        .hitl
                        .await_resolution(handle, self.config.escalation_timeout())
                        .await;
                    turn.escalation = None;
                    let answer = answer?;
                    tracing::info!(task_id = %request.task_id, context_id, "resuming with human response");
                    updater.working(Some(RESUMING_MESSAGE)).await;
                    input = format!("{HUMAN_RESPONSE_PREFIX}{answer}");
                }
            }
        }
    }

    /// Run one turn with rate-limit backoff and a single stuck-thread recreation.
    ///
    /// A permit is held only while the upstream call is in flight. Usage and
    /// artifacts of a retried attempt are discarded, and progress already
    /// reported by an earlier attempt is not reported again.
    async fn run_segment(
        &self,
        request: &TurnRequest,
        thread_id: &mut String,
        input: &str,
        mut permit: Option<RatePermit>,
        updater: &mut TaskUpdater<'_>,
        turn: &mut TurnState,
    ) -> Result<SegmentEnd, RelayError> {
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;
        let mut recreated = false;
        let mut reported = HashSet::new();

        loop {
            let admitted = match permit.take() {
                Some(permit) => permit,
                None => self.limiter.acquire().await,
            };
            let mut output = AttemptOutput::default();
            let result = self
                .stream_turn(request, thread_id.as_str(), input, updater, &reported, &mut output)
                .await;
            drop(admitted);

            let error = match result {
                Ok(end) => {
                    turn.commit(output);
                    return Ok(end);
                }
                Err(error) => error,
            };

            match error.category().recovery() {
                RecoverySuggestion::RetryWithBackoff => {
                    if !policy.allows_retry(attempt) {
                        turn.commit(output);
                        return Err(RelayError::RateLimitExceeded {
                            attempts: attempt + 1,
                        });
                    }
                    let delay = policy.delay_for(attempt, error.retry_after_ms());
                    tracing::warn!(
                        task_id = %request.task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "upstream rate limited, backing off"
                    );
                    reported.extend(output.progress);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RecoverySuggestion::RecreateThread if !recreated => {
                    recreated = true;
                    tracing::warn!(
                        task_id = %request.task_id,
                        context_id = %request.context_id,
                        thread_id = %thread_id,
                        "upstream thread stuck, recreating"
                    );
                    reported.extend(output.progress);
                    *thread_id = self.threads.resolve(&request.context_id, true).await?;
                    turn.thread_id = Some(thread_id.clone());
                }
                _ => {
                    turn.commit(output);
                    return Err(error.into());
                }
            }
        }
    }

    async fn stream_turn(
        &self,
        request: &TurnRequest,
        thread_id: &str,
        input: &str,
        updater: &mut TaskUpdater<'_>,
        reported: &HashSet<String>,
        output: &mut AttemptOutput,
    ) -> Result<SegmentEnd, UpstreamError> {
        tracing::debug!(task_id = %request.task_id, thread_id, "starting upstream turn");
        let raw = self.client.run_turn(thread_id, input).await?;
        let mut events = self.translator.translate(raw);

        let mut final_text = None;
        let mut escalation = None;
        while let Some(event) = events.next().await {
            let event = event?;
            tracing::debug!(task_id = %request.task_id, event = ?event, "stream event");
            match event {
                StreamEvent::ToolStarted { .. }
                | StreamEvent::ToolCompleted { .. }
                | StreamEvent::Processing { .. } => {
                    if let Some(text) = event.progress_text() {
                        if !reported.contains(&text) {
                            updater.working(Some(&text)).await;
                        }
                        output.progress.push(text);
                    }
                }
                StreamEvent::TokenUsage(usage) => output.usage.merge(&usage),
                StreamEvent::ArtifactProduced(artifact) => output.artifacts.push(artifact),
                StreamEvent::FinalText { text } => final_text = Some(text),
                StreamEvent::HumanEscalationRequested { prompt_text } => {
                    escalation = Some(prompt_text)
                }
                StreamEvent::Failure { message } => return Err(UpstreamError::Failed(message)),
            }
        }

        Ok(match (escalation, final_text) {
            (Some(prompt), _) => SegmentEnd::Escalation(prompt),
            (None, Some(text)) => SegmentEnd::Final(text),
            (None, None) => SegmentEnd::NoText,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
