//! Token usage types.

use serde::{Deserialize, Serialize};

/// Token usage reported by the upstream for one turn.
///
/// Accepts the field spellings the common runtimes use (`prompt_tokens`,
/// `promptTokens`, `input_tokens`, ...) so adapters can deserialize vendor
/// payloads directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, alias = "promptTokens", alias = "input_tokens", alias = "inputTokens")]
    pub prompt_tokens: u32,
    #[serde(
        default,
        alias = "completionTokens",
        alias = "output_tokens",
        alias = "outputTokens"
    )]
    pub completion_tokens: u32,
    #[serde(default, alias = "totalTokens")]
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}
