//! Context id to upstream thread mapping.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::UpstreamError;
use crate::upstream::UpstreamConversationClient;

/// Maps caller context ids to upstream thread ids.
///
/// Resolutions of the same context are serialized by a per-context gate, so
/// they never race to create two threads. The map lock is only held for
/// lookups and inserts; a slow thread creation for one context does not block
/// any other. A mapping is only stored once the upstream has returned a
/// thread id.
pub struct ThreadRegistry {
    client: Arc<dyn UpstreamConversationClient>,
    inner: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    threads: HashMap<String, String>,
    gates: HashMap<String, Arc<Mutex<()>>>,
}

impl ThreadRegistry {
    pub fn new(client: Arc<dyn UpstreamConversationClient>) -> Self {
        Self {
            client,
            inner: Mutex::new(Registry::default()),
        }
    }

    /// Return the thread for `context_id`, creating one if needed.
    ///
    /// With `force_new` a fresh thread is always created and replaces any
    /// existing mapping.
    pub async fn resolve(&self, context_id: &str, force_new: bool) -> Result<String, UpstreamError> {
        let gate = {
            let mut inner = self.inner.lock().await;
            if !force_new {
                if let Some(thread_id) = inner.threads.get(context_id) {
                    return Ok(thread_id.clone());
                }
            }
            inner.gates.entry(context_id.to_string()).or_default().clone()
        };

        let _serialized = gate.lock().await;
        if !force_new {
            // Another resolution may have created it while we queued.
            if let Some(thread_id) = self.get(context_id).await {
                return Ok(thread_id);
            }
        }

        let thread_id = self.client.create_thread().await?;
        tracing::debug!(
            context_id,
            thread_id = %thread_id,
            force_new,
            upstream = self.client.name(),
            "created upstream thread"
        );
        self.inner
            .lock()
            .await
            .threads
            .insert(context_id.to_string(), thread_id.clone());
        Ok(thread_id)
    }

    pub async fn get(&self, context_id: &str) -> Option<String> {
        self.inner.lock().await.threads.get(context_id).cloned()
    }

    /// Drop the mapping for `context_id`, returning the evicted thread id.
    pub async fn evict(&self, context_id: &str) -> Option<String> {
        self.inner.lock().await.threads.remove(context_id)
    }

    /// Drop the mapping for `context_id` only if it still points at `thread_id`.
    ///
    /// A later resolution may have replaced the mapping; that one is kept.
    pub async fn evict_if(&self, context_id: &str, thread_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.threads.get(context_id).map(String::as_str) != Some(thread_id) {
            return false;
        }
        inner.threads.remove(context_id);
        true
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.threads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.threads.is_empty()
    }

    /// Remove every mapping (process shutdown).
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.threads.clear();
        inner.gates.clear();
    }
}
