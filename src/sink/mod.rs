//! Task protocol sink.
//!
//! The coordinator reports every task-state transition through a
//! [`TaskSink`]. [`TaskUpdater`] sits in front of the sink and keeps the
//! emitted sequence valid for the task state machine; [`ChannelSink`] turns
//! the calls into A2A [`TaskStatusUpdate`] events.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::RelayError;
use crate::types::{Artifact, TaskMessage, TaskState, TaskStatus, TaskStatusUpdate};

/// Receiver of task-status transitions, implemented by the A2A layer.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn submit(&self) -> Result<(), RelayError>;

    async fn start_work(&self) -> Result<(), RelayError>;

    async fn update_status(
        &self,
        state: TaskState,
        message: Option<TaskMessage>,
    ) -> Result<(), RelayError>;

    async fn complete(
        &self,
        message: TaskMessage,
        artifacts: Vec<Artifact>,
    ) -> Result<(), RelayError>;

    async fn failed(&self, message: TaskMessage) -> Result<(), RelayError>;
}

/// State-machine guard over a [`TaskSink`] for one task.
///
/// `Submitted` is emitted once, before anything else. Once a terminal state
/// has been emitted every further transition is dropped. Sink failures are
/// logged and never abort the task.
pub struct TaskUpdater<'a> {
    sink: &'a dyn TaskSink,
    task_id: String,
    state: Option<TaskState>,
    started: bool,
}

impl<'a> TaskUpdater<'a> {
    pub fn new(sink: &'a dyn TaskSink, task_id: impl Into<String>) -> Self {
        Self {
            sink,
            task_id: task_id.into(),
            state: None,
            started: false,
        }
    }

    /// Last state emitted, if any.
    pub fn state(&self) -> Option<TaskState> {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_some_and(|s| s.is_terminal())
    }

    pub async fn submit(&mut self) {
        if self.state.is_some() {
            return;
        }
        let result = self.sink.submit().await;
        self.record(TaskState::Submitted, result);
    }

    /// Enter or stay in `Working`, optionally with a progress message.
    pub async fn working(&mut self, text: Option<&str>) {
        if self.dropped(TaskState::Working) {
            return;
        }
        self.submit().await;

        if !self.started {
            self.started = true;
            let result = self.sink.start_work().await;
            self.record(TaskState::Working, result);
            if text.is_none() {
                return;
            }
        }
        let result = self
            .sink
            .update_status(TaskState::Working, text.map(TaskMessage::text))
            .await;
        self.record(TaskState::Working, result);
    }

    pub async fn input_required(&mut self, prompt: &str) {
        if self.dropped(TaskState::InputRequired) {
            return;
        }
        self.submit().await;
        let result = self
            .sink
            .update_status(TaskState::InputRequired, Some(TaskMessage::text(prompt)))
            .await;
        self.record(TaskState::InputRequired, result);
    }

    pub async fn complete(&mut self, message: TaskMessage, artifacts: Vec<Artifact>) {
        if self.dropped(TaskState::Completed) {
            return;
        }
        self.submit().await;
        let result = self.sink.complete(message, artifacts).await;
        self.record(TaskState::Completed, result);
    }

    pub async fn fail(&mut self, message: TaskMessage) {
        if self.dropped(TaskState::Failed) {
            return;
        }
        self.submit().await;
        let result = self.sink.failed(message).await;
        self.record(TaskState::Failed, result);
    }

    fn dropped(&self, next: TaskState) -> bool {
        match self.state {
            Some(current) if current.is_terminal() => {
                tracing::warn!(
                    task_id = %self.task_id,
                    current = %current,
                    next = %next,
                    "dropping transition after terminal state"
                );
                true
            }
            _ => false,
        }
    }

    fn record(&mut self, state: TaskState, result: Result<(), RelayError>) {
        if let Err(error) = result {
            tracing::warn!(task_id = %self.task_id, state = %state, %error, "task sink rejected update");
        }
        self.state = Some(state);
    }
}

/// Sink that publishes [`TaskStatusUpdate`] events on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    task_id: String,
    context_id: String,
    sender: mpsc::UnboundedSender<TaskStatusUpdate>,
}

impl ChannelSink {
    pub fn new(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
    ) -> (Self, UnboundedReceiverStream<TaskStatusUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            sender,
        };
        (sink, UnboundedReceiverStream::new(receiver))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    fn publish(
        &self,
        state: TaskState,
        message: Option<TaskMessage>,
        artifacts: Vec<Artifact>,
    ) -> Result<(), RelayError> {
        let update = TaskStatusUpdate {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus {
                state,
                message,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            },
            artifacts,
            is_final: state.is_terminal(),
        };
        self.sender
            .send(update)
            .map_err(|_| RelayError::Sink("status subscriber has gone away".to_string()))
    }
}

#[async_trait]
impl TaskSink for ChannelSink {
    async fn submit(&self) -> Result<(), RelayError> {
        self.publish(TaskState::Submitted, None, Vec::new())
    }

    async fn start_work(&self) -> Result<(), RelayError> {
        self.publish(TaskState::Working, None, Vec::new())
    }

    async fn update_status(
        &self,
        state: TaskState,
        message: Option<TaskMessage>,
    ) -> Result<(), RelayError> {
        self.publish(state, message, Vec::new())
    }

    async fn complete(
        &self,
        message: TaskMessage,
        artifacts: Vec<Artifact>,
    ) -> Result<(), RelayError> {
        self.publish(TaskState::Completed, Some(message), artifacts)
    }

    async fn failed(&self, message: TaskMessage) -> Result<(), RelayError> {
        self.publish(TaskState::Failed, Some(message), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    async fn collect(
        sink: ChannelSink,
        updates: UnboundedReceiverStream<TaskStatusUpdate>,
    ) -> Vec<(TaskState, Option<String>)> {
        drop(sink);
        updates
            .map(|u| (u.state(), u.text().map(str::to_string)))
            .collect()
            .await
    }

    #[tokio::test]
    async fn updater_emits_submitted_once_before_work() {
        let (sink, updates) = ChannelSink::new("t-1", "ctx-1");
        {
            let mut updater = TaskUpdater::new(&sink, "t-1");
            updater.working(None).await;
            updater.working(Some("Calling tool: search")).await;
            updater.submit().await;
            updater.complete(TaskMessage::text("done"), Vec::new()).await;
        }

        assert_eq!(
            collect(sink, updates).await,
            vec![
                (TaskState::Submitted, None),
                (TaskState::Working, None),
                (TaskState::Working, Some("Calling tool: search".into())),
                (TaskState::Completed, Some("done".into())),
            ]
        );
    }

    #[tokio::test]
    async fn first_working_with_text_starts_work_then_reports() {
        let (sink, updates) = ChannelSink::new("t-1", "ctx-1");
        {
            let mut updater = TaskUpdater::new(&sink, "t-1");
            updater.working(Some("resuming")).await;
        }
        assert_eq!(
            collect(sink, updates).await,
            vec![
                (TaskState::Submitted, None),
                (TaskState::Working, None),
                (TaskState::Working, Some("resuming".into())),
            ]
        );
    }

    #[tokio::test]
    async fn transitions_after_terminal_are_dropped() {
        let (sink, updates) = ChannelSink::new("t-1", "ctx-1");
        {
            let mut updater = TaskUpdater::new(&sink, "t-1");
            updater.fail(TaskMessage::text("task cancelled")).await;
            assert!(updater.is_terminal());
            updater.working(Some("late")).await;
            updater.input_required("late?").await;
            updater.complete(TaskMessage::text("late"), Vec::new()).await;
            updater.fail(TaskMessage::text("again")).await;
            assert_eq!(updater.state(), Some(TaskState::Failed));
        }

        assert_eq!(
            collect(sink, updates).await,
            vec![
                (TaskState::Submitted, None),
                (TaskState::Failed, Some("task cancelled".into())),
            ]
        );
    }

    #[tokio::test]
    async fn channel_sink_marks_terminal_updates_final() {
        let (sink, mut updates) = ChannelSink::new("t-9", "ctx-9");
        let artifact = Artifact::new("file:///tmp/report.pdf").with_name("report");
        sink.update_status(TaskState::InputRequired, Some(TaskMessage::text("amount?")))
            .await
            .unwrap();
        sink.complete(TaskMessage::text("ok"), vec![artifact.clone()])
            .await
            .unwrap();

        let interrupt = updates.next().await.unwrap();
        assert!(!interrupt.is_final);
        assert_eq!(interrupt.state(), TaskState::InputRequired);
        assert_eq!(interrupt.task_id, "t-9");
        assert_eq!(interrupt.context_id, "ctx-9");
        assert!(interrupt.status.timestamp.is_some());

        let done = updates.next().await.unwrap();
        assert!(done.is_final);
        assert_eq!(done.artifacts, vec![artifact]);
    }

    #[tokio::test]
    async fn closed_subscriber_is_a_sink_error() {
        let (sink, updates) = ChannelSink::new("t-1", "ctx-1");
        drop(updates);
        assert!(matches!(sink.submit().await, Err(RelayError::Sink(_))));

        // The updater swallows it and keeps tracking state.
        let mut updater = TaskUpdater::new(&sink, "t-1");
        updater.working(None).await;
        assert_eq!(updater.state(), Some(TaskState::Working));
    }
}
