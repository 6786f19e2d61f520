//! Streaming event types: the raw upstream vocabulary and its normalized form.

use serde::{Deserialize, Serialize};

use super::task::Artifact;
use super::usage::Usage;

/// Event yielded by an upstream adapter while a turn runs.
///
/// Adapters map vendor events (Foundry run steps, Responses API deltas, ...)
/// onto this vocabulary. Field and tag spellings from both snake_case and
/// camelCase payloads are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawUpstreamEvent {
    #[serde(alias = "toolCallStarted")]
    ToolCallStarted {
        #[serde(alias = "toolName", alias = "tool_name")]
        name: String,
    },
    #[serde(alias = "toolCallCompleted")]
    ToolCallCompleted {
        #[serde(alias = "toolName", alias = "tool_name")]
        name: String,
    },
    /// Free-form progress text (run step status, queue position, ...).
    Status { text: String },
    #[serde(alias = "textDelta")]
    TextDelta {
        #[serde(alias = "delta")]
        text: String,
    },
    /// The assistant message being streamed is complete.
    #[serde(alias = "messageCompleted")]
    MessageCompleted,
    Usage(Usage),
    Artifact(Artifact),
    #[serde(alias = "runFailed")]
    RunFailed {
        #[serde(alias = "error")]
        message: String,
    },
    /// The upstream run finished.
    Done,
}

impl RawUpstreamEvent {
    pub fn tool_started(name: impl Into<String>) -> Self {
        Self::ToolCallStarted { name: name.into() }
    }

    pub fn tool_completed(name: impl Into<String>) -> Self {
        Self::ToolCallCompleted { name: name.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::RunFailed {
            message: message.into(),
        }
    }
}

/// Normalized event produced by the stream translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ToolStarted { name: String },
    ToolCompleted { name: String },
    Processing { text: String },
    FinalText { text: String },
    TokenUsage(Usage),
    HumanEscalationRequested { prompt_text: String },
    Failure { message: String },
    ArtifactProduced(Artifact),
}

impl StreamEvent {
    /// Whether this event ends normal processing of the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalText { .. } | Self::HumanEscalationRequested { .. } | Self::Failure { .. }
        )
    }

    /// Human-readable progress description for a `Working` status update.
    pub fn progress_text(&self) -> Option<String> {
        match self {
            Self::ToolStarted { name } => Some(format!("Calling tool: {name}")),
            Self::ToolCompleted { name } => Some(format!("Tool {name} completed")),
            Self::Processing { text } => Some(text.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_events_accept_camel_case_payloads() {
        let event: RawUpstreamEvent =
            serde_json::from_str(r#"{"type":"toolCallStarted","toolName":"search"}"#).unwrap();
        assert_eq!(event, RawUpstreamEvent::tool_started("search"));

        let event: RawUpstreamEvent =
            serde_json::from_str(r#"{"type":"text_delta","delta":"Hel"}"#).unwrap();
        assert_eq!(event, RawUpstreamEvent::text("Hel"));

        let event: RawUpstreamEvent =
            serde_json::from_str(r#"{"type":"runFailed","error":"quota"}"#).unwrap();
        assert_eq!(event, RawUpstreamEvent::failed("quota"));
    }

    #[test]
    fn raw_usage_event_deserializes_inline_counters() {
        let event: RawUpstreamEvent = serde_json::from_str(
            r#"{"type":"usage","promptTokens":3,"completionTokens":4,"totalTokens":7}"#,
        )
        .unwrap();
        assert_eq!(event, RawUpstreamEvent::Usage(Usage::new(3, 4)));
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::FinalText { text: "x".into() }.is_terminal());
        assert!(StreamEvent::Failure { message: "x".into() }.is_terminal());
        assert!(StreamEvent::HumanEscalationRequested {
            prompt_text: "x".into()
        }
        .is_terminal());
        assert!(!StreamEvent::TokenUsage(Usage::default()).is_terminal());
        assert!(!StreamEvent::ToolStarted { name: "x".into() }.is_terminal());
    }

    #[test]
    fn progress_text_names_the_tool() {
        let started = StreamEvent::ToolStarted {
            name: "search".into(),
        };
        let completed = StreamEvent::ToolCompleted {
            name: "search".into(),
        };
        assert_eq!(started.progress_text().unwrap(), "Calling tool: search");
        assert_eq!(completed.progress_text().unwrap(), "Tool search completed");
        assert!(StreamEvent::FinalText { text: "x".into() }
            .progress_text()
            .is_none());
    }
}
