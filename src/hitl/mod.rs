//! Human-in-the-loop escalations.
//!
//! When a turn needs information only a person can give, the executor
//! registers an escalation for the context and waits on it. Any external
//! channel (UI, chat relay, bot webhook) answers through
//! [`HitlCoordinator::submit_human_response`].
//!
//! Per context the state moves `none -> pending -> resolved -> removed`.
//! The entry is removed as soon as the waiter consumes the answer, times
//! out, is cancelled, or is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::RelayError;

#[derive(Debug)]
enum Resolution {
    Answered(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscalationState {
    Pending,
    Resolved,
}

#[derive(Debug)]
struct PendingEscalation {
    id: u64,
    prompt_text: String,
    requested_at: DateTime<Utc>,
    state: EscalationState,
    answer: Option<String>,
    signal: Option<oneshot::Sender<Resolution>>,
}

/// Single-use wait handle returned by [`HitlCoordinator::request_escalation`].
#[derive(Debug)]
pub struct WaitHandle {
    id: u64,
    context_id: String,
    receiver: oneshot::Receiver<Resolution>,
}

impl WaitHandle {
    /// Generation id of the escalation; unique per coordinator.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }
}

/// Escalation waiting for a human, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationSummary {
    pub context_id: String,
    pub prompt_text: String,
    pub requested_at: DateTime<Utc>,
}

/// Registry of in-flight escalations keyed by context id.
#[derive(Debug, Default)]
pub struct HitlCoordinator {
    pending: Mutex<HashMap<String, PendingEscalation>>,
    next_id: AtomicU64,
}

impl HitlCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEscalation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open an escalation for `context_id`.
    ///
    /// Fails with [`RelayError::DuplicateEscalation`] if one is already open.
    pub fn request_escalation(
        &self,
        context_id: &str,
        prompt_text: &str,
    ) -> Result<WaitHandle, RelayError> {
        let mut entries = self.entries();
        if entries.contains_key(context_id) {
            return Err(RelayError::DuplicateEscalation {
                context_id: context_id.to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        entries.insert(
            context_id.to_string(),
            PendingEscalation {
                id,
                prompt_text: prompt_text.to_string(),
                requested_at: Utc::now(),
                state: EscalationState::Pending,
                answer: None,
                signal: Some(sender),
            },
        );
        tracing::info!(context_id, "escalation requested, waiting for human input");

        Ok(WaitHandle {
            id,
            context_id: context_id.to_string(),
            receiver,
        })
    }

    /// Deliver a human answer.
    ///
    /// Returns `false` when nothing is pending for `context_id`: unknown ids,
    /// late or duplicate replies, and timed-out escalations are all normal.
    pub fn submit_human_response(&self, context_id: &str, answer: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(context_id) else {
            tracing::debug!(context_id, "human response with no pending escalation");
            return false;
        };
        if entry.state != EscalationState::Pending {
            return false;
        }
        let Some(signal) = entry.signal.take() else {
            return false;
        };

        if signal.send(Resolution::Answered(answer.to_string())).is_err() {
            // Waiter is gone; nothing will consume this entry.
            entries.remove(context_id);
            return false;
        }
        entry.state = EscalationState::Resolved;
        entry.answer = Some(answer.to_string());
        tracing::info!(context_id, "human response delivered");
        true
    }

    /// Wait for the escalation behind `handle` to be answered.
    ///
    /// On timeout the escalation is abandoned: the entry is removed and a
    /// late answer is rejected. Cancellation resolves with
    /// [`RelayError::EscalationCancelled`].
    pub async fn await_resolution(
        &self,
        handle: WaitHandle,
        timeout: Option<Duration>,
    ) -> Result<String, RelayError> {
        let WaitHandle {
            id,
            context_id,
            receiver,
        } = handle;
        let _cleanup = EntryCleanup {
            coordinator: self,
            context_id: &context_id,
            id,
        };

        let resolution = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(resolution) => resolution,
                Err(_) => {
                    tracing::warn!(
                        context_id = %context_id,
                        timeout_ms = limit.as_millis() as u64,
                        "escalation timed out"
                    );
                    return Err(RelayError::EscalationTimeout {
                        context_id: context_id.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => receiver.await,
        };

        match resolution {
            Ok(Resolution::Answered(answer)) => Ok(answer),
            Ok(Resolution::Cancelled) | Err(_) => Err(RelayError::EscalationCancelled {
                context_id: context_id.clone(),
            }),
        }
    }

    /// Release whoever waits on `context_id` without an answer.
    ///
    /// Returns `true` if a pending waiter was signalled.
    pub fn cancel(&self, context_id: &str) -> bool {
        let Some(mut entry) = self.entries().remove(context_id) else {
            return false;
        };
        match entry.signal.take() {
            Some(signal) => {
                tracing::info!(context_id, "escalation cancelled");
                let _ = signal.send(Resolution::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Cancel the escalation `id` on `context_id` if it is still the open one.
    ///
    /// Used by the task that opened it; a newer escalation on the same
    /// context is left alone.
    pub fn withdraw(&self, context_id: &str, id: u64) -> bool {
        let mut entries = self.entries();
        if !entries.get(context_id).is_some_and(|e| e.id == id) {
            return false;
        }
        let Some(mut entry) = entries.remove(context_id) else {
            return false;
        };
        tracing::info!(context_id, escalation_id = id, "escalation withdrawn");
        if let Some(signal) = entry.signal.take() {
            let _ = signal.send(Resolution::Cancelled);
        }
        true
    }

    /// Cancel every open escalation, returning how many waiters were released.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingEscalation> = self.entries().drain().map(|(_, e)| e).collect();
        drained
            .into_iter()
            .filter_map(|mut entry| entry.signal.take())
            .map(|signal| signal.send(Resolution::Cancelled).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    pub fn is_pending(&self, context_id: &str) -> bool {
        self.entries()
            .get(context_id)
            .is_some_and(|e| e.state == EscalationState::Pending)
    }

    pub fn pending_prompt(&self, context_id: &str) -> Option<String> {
        self.entries()
            .get(context_id)
            .filter(|e| e.state == EscalationState::Pending)
            .map(|e| e.prompt_text.clone())
    }

    /// Answer recorded for a resolved escalation not yet consumed by its waiter.
    pub fn resolved_answer(&self, context_id: &str) -> Option<String> {
        self.entries()
            .get(context_id)
            .and_then(|e| e.answer.clone())
    }

    /// Escalations still waiting for a human, oldest first.
    pub fn pending(&self) -> Vec<EscalationSummary> {
        let mut summaries: Vec<EscalationSummary> = self
            .entries()
            .iter()
            .filter(|(_, e)| e.state == EscalationState::Pending)
            .map(|(context_id, e)| EscalationSummary {
                context_id: context_id.clone(),
                prompt_text: e.prompt_text.clone(),
                requested_at: e.requested_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        summaries
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Removes the waiter's own entry however `await_resolution` ends.
struct EntryCleanup<'a> {
    coordinator: &'a HitlCoordinator,
    context_id: &'a str,
    id: u64,
}

impl Drop for EntryCleanup<'_> {
    fn drop(&mut self) {
        let mut entries = self.coordinator.entries();
        if entries.get(self.context_id).is_some_and(|e| e.id == self.id) {
            entries.remove(self.context_id);
        }
    }
}
