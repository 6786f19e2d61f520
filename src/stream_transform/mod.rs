//! Translation of raw upstream streams into normalized [`StreamEvent`]s.

pub mod markers;

pub use markers::{BlockMarkers, MarkerGrammar, MarkerMatcher, TextClass};

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::UpstreamError;
use crate::types::{RawUpstreamEvent, StreamEvent};
use crate::upstream::RawEventStream;

/// Normalized event stream for one turn.
pub type TranslatedStream = BoxStream<'static, Result<StreamEvent, UpstreamError>>;

/// Message used when a turn produced nothing at all.
pub const NO_RESPONSE_MESSAGE: &str = "no response generated";

/// Turns a raw upstream stream into the coordinator's event vocabulary.
///
/// Per turn the translator:
/// - reports each tool name once on start and once on completion;
/// - buffers text deltas until the message completes, then classifies the
///   message with the [`MarkerMatcher`];
/// - emits the last plain message as `FinalText` when the stream ends,
///   earlier messages as `Processing`;
/// - after `FinalText` or an escalation, keeps draining the upstream only to
///   forward trailing `TokenUsage`; after `Failure` it stops.
#[derive(Debug, Clone)]
pub struct StreamTranslator {
    markers: Arc<MarkerMatcher>,
}

impl StreamTranslator {
    pub fn new(markers: Arc<MarkerMatcher>) -> Self {
        Self { markers }
    }

    pub fn translate(&self, raw: RawEventStream) -> TranslatedStream {
        let markers = self.markers.clone();
        let translated = async_stream::stream! {
            let mut inner = raw;
            let mut tools_started: HashSet<String> = HashSet::new();
            let mut tools_completed: HashSet<String> = HashSet::new();
            let mut buffer = String::new();
            let mut candidate: Option<String> = None;
            let mut saw_activity = false;
            let mut settled = false;

            while let Some(item) = inner.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(err) => {
                        if !settled {
                            yield Err(err);
                        }
                        return;
                    }
                };

                if settled {
                    match event {
                        RawUpstreamEvent::Usage(usage) => {
                            yield Ok(StreamEvent::TokenUsage(usage));
                        }
                        RawUpstreamEvent::Done => break,
                        _ => {}
                    }
                    continue;
                }

                match event {
                    RawUpstreamEvent::ToolCallStarted { name } => {
                        saw_activity = true;
                        if let Some(text) = candidate.take() {
                            yield Ok(StreamEvent::Processing { text });
                        }
                        if tools_started.insert(name.clone()) {
                            yield Ok(StreamEvent::ToolStarted { name });
                        }
                    }
                    RawUpstreamEvent::ToolCallCompleted { name } => {
                        saw_activity = true;
                        if tools_completed.insert(name.clone()) {
                            yield Ok(StreamEvent::ToolCompleted { name });
                        }
                    }
                    RawUpstreamEvent::Status { text } => {
                        saw_activity = true;
                        if !text.trim().is_empty() {
                            yield Ok(StreamEvent::Processing { text });
                        }
                    }
                    RawUpstreamEvent::TextDelta { text } => {
                        buffer.push_str(&text);
                    }
                    RawUpstreamEvent::MessageCompleted => {
                        match markers.classify(&std::mem::take(&mut buffer)) {
                            TextClass::Reply(text) => {
                                saw_activity = true;
                                if let Some(previous) = candidate.replace(text) {
                                    yield Ok(StreamEvent::Processing { text: previous });
                                }
                            }
                            TextClass::Escalation(prompt_text) => {
                                settled = true;
                                yield Ok(StreamEvent::HumanEscalationRequested { prompt_text });
                            }
                            TextClass::Error(message) => {
                                yield Ok(StreamEvent::Failure { message });
                                return;
                            }
                            TextClass::Empty => {}
                        }
                    }
                    RawUpstreamEvent::Usage(usage) => {
                        yield Ok(StreamEvent::TokenUsage(usage));
                    }
                    RawUpstreamEvent::Artifact(artifact) => {
                        saw_activity = true;
                        yield Ok(StreamEvent::ArtifactProduced(artifact));
                    }
                    RawUpstreamEvent::RunFailed { message } => {
                        yield Ok(StreamEvent::Failure { message });
                        return;
                    }
                    RawUpstreamEvent::Done => break,
                }
            }

            if settled {
                return;
            }

            // Text still buffered when the stream ends counts as a completed message.
            match markers.classify(&buffer) {
                TextClass::Reply(text) => {
                    saw_activity = true;
                    if let Some(previous) = candidate.replace(text) {
                        yield Ok(StreamEvent::Processing { text: previous });
                    }
                }
                TextClass::Escalation(prompt_text) => {
                    yield Ok(StreamEvent::HumanEscalationRequested { prompt_text });
                    return;
                }
                TextClass::Error(message) => {
                    yield Ok(StreamEvent::Failure { message });
                    return;
                }
                TextClass::Empty => {}
            }

            match candidate {
                Some(text) => {
                    yield Ok(StreamEvent::FinalText { text });
                }
                None if !saw_activity => {
                    yield Ok(StreamEvent::Failure {
                        message: NO_RESPONSE_MESSAGE.to_string(),
                    });
                }
                None => {}
            }
        };

        Box::pin(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Artifact, Usage};
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn translator() -> StreamTranslator {
        StreamTranslator::new(Arc::new(
            MarkerMatcher::new(MarkerGrammar::default()).unwrap(),
        ))
    }

    async fn translate(events: Vec<RawUpstreamEvent>) -> Vec<StreamEvent> {
        let raw: RawEventStream = stream::iter(events.into_iter().map(Ok)).boxed();
        translator()
            .translate(raw)
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn tool_events_then_final_text() {
        let events = translate(vec![
            RawUpstreamEvent::tool_started("search"),
            RawUpstreamEvent::tool_completed("search"),
            RawUpstreamEvent::text("Paris is "),
            RawUpstreamEvent::text("the capital."),
            RawUpstreamEvent::MessageCompleted,
            RawUpstreamEvent::Done,
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::ToolStarted {
                    name: "search".into()
                },
                StreamEvent::ToolCompleted {
                    name: "search".into()
                },
                StreamEvent::FinalText {
                    text: "Paris is the capital.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn repeated_tool_calls_are_reported_once_in_upstream_order() {
        let events = translate(vec![
            RawUpstreamEvent::tool_started("crm_lookup"),
            RawUpstreamEvent::tool_started("crm_lookup"),
            RawUpstreamEvent::tool_started("invoice_search"),
            RawUpstreamEvent::tool_completed("invoice_search"),
            RawUpstreamEvent::tool_completed("crm_lookup"),
            RawUpstreamEvent::tool_completed("crm_lookup"),
            RawUpstreamEvent::text("done"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::ToolStarted {
                    name: "crm_lookup".into()
                },
                StreamEvent::ToolStarted {
                    name: "invoice_search".into()
                },
                StreamEvent::ToolCompleted {
                    name: "invoice_search".into()
                },
                StreamEvent::ToolCompleted {
                    name: "crm_lookup".into()
                },
                StreamEvent::FinalText {
                    text: "done".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn earlier_messages_become_processing() {
        let events = translate(vec![
            RawUpstreamEvent::text("Let me look that up."),
            RawUpstreamEvent::MessageCompleted,
            RawUpstreamEvent::tool_started("search"),
            RawUpstreamEvent::text("Found it."),
            RawUpstreamEvent::MessageCompleted,
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Processing {
                    text: "Let me look that up.".into()
                },
                StreamEvent::ToolStarted {
                    name: "search".into()
                },
                StreamEvent::FinalText {
                    text: "Found it.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn escalation_stops_text_but_forwards_trailing_usage() {
        let events = translate(vec![
            RawUpstreamEvent::text("HUMAN_ESCALATION_REQUIRED: please confirm amount"),
            RawUpstreamEvent::MessageCompleted,
            RawUpstreamEvent::text("ignored"),
            RawUpstreamEvent::tool_started("ignored_tool"),
            RawUpstreamEvent::Usage(Usage::new(12, 3)),
            RawUpstreamEvent::Done,
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::HumanEscalationRequested {
                    prompt_text: "please confirm amount".into()
                },
                StreamEvent::TokenUsage(Usage::new(12, 3)),
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_escalation_is_detected_at_stream_end() {
        let events = translate(vec![RawUpstreamEvent::text(
            "NEEDS_INPUT Which customer? END_NEEDS_INPUT",
        )])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::HumanEscalationRequested {
                prompt_text: "Which customer?".into()
            }]
        );
    }

    #[tokio::test]
    async fn error_prefix_fails_the_turn() {
        let events = translate(vec![
            RawUpstreamEvent::text("Error: Stripe API key is invalid"),
            RawUpstreamEvent::MessageCompleted,
            RawUpstreamEvent::Usage(Usage::new(1, 1)),
        ])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::Failure {
                message: "Error: Stripe API key is invalid".into()
            }]
        );
    }

    #[tokio::test]
    async fn run_failure_is_terminal() {
        let events = translate(vec![
            RawUpstreamEvent::tool_started("search"),
            RawUpstreamEvent::failed("tool search failed"),
            RawUpstreamEvent::text("never seen"),
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolStarted {
                    name: "search".into()
                },
                StreamEvent::Failure {
                    message: "tool search failed".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn empty_stream_is_a_failure() {
        let events = translate(vec![RawUpstreamEvent::Done]).await;
        assert_eq!(
            events,
            vec![StreamEvent::Failure {
                message: NO_RESPONSE_MESSAGE.into()
            }]
        );
    }

    #[tokio::test]
    async fn activity_without_text_ends_without_terminal_event() {
        let events = translate(vec![
            RawUpstreamEvent::tool_started("render_chart"),
            RawUpstreamEvent::tool_completed("render_chart"),
            RawUpstreamEvent::Done,
        ])
        .await;
        assert!(events.iter().all(|e| !e.is_terminal()));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn usage_and_artifacts_are_side_channel() {
        let artifact = Artifact::new("https://files.example/report.xlsx").with_name("report");
        let events = translate(vec![
            RawUpstreamEvent::Artifact(artifact.clone()),
            RawUpstreamEvent::text("Report ready."),
            RawUpstreamEvent::MessageCompleted,
            RawUpstreamEvent::Usage(Usage::new(5, 5)),
            RawUpstreamEvent::Done,
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::ArtifactProduced(artifact),
                StreamEvent::TokenUsage(Usage::new(5, 5)),
                StreamEvent::FinalText {
                    text: "Report ready.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn upstream_errors_pass_through() {
        let raw: RawEventStream = stream::iter(vec![
            Ok(RawUpstreamEvent::tool_started("search")),
            Err(UpstreamError::RateLimited {
                retry_after_ms: Some(500),
            }),
            Ok(RawUpstreamEvent::text("unreachable")),
        ])
        .boxed();
        let items: Vec<_> = translator().translate(raw).collect().await;
        assert_eq!(
            items,
            vec![
                Ok(StreamEvent::ToolStarted {
                    name: "search".into()
                }),
                Err(UpstreamError::RateLimited {
                    retry_after_ms: Some(500)
                }),
            ]
        );
    }
}
