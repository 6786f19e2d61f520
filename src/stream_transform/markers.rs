//! In-band marker grammar for escalation and error detection.
//!
//! Models signal "I need a human" or "I failed" by writing fixed strings into
//! their reply. The strings differ per upstream, so the grammar is data.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Marker strings recognized in assistant text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerGrammar {
    /// Any of these anywhere in the text requests human input. The prompt is
    /// the text following the sentinel.
    pub escalation_sentinels: Vec<String>,
    /// Delimiters of a block whose contents are the prompt for the human.
    pub input_block: Option<BlockMarkers>,
    /// Text starting with this prefix is an in-band failure.
    pub error_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarkers {
    pub start: String,
    pub end: String,
}

impl Default for MarkerGrammar {
    fn default() -> Self {
        Self {
            escalation_sentinels: vec!["HUMAN_ESCALATION_REQUIRED".to_string()],
            input_block: Some(BlockMarkers {
                start: "NEEDS_INPUT".to_string(),
                end: "END_NEEDS_INPUT".to_string(),
            }),
            error_prefix: Some("Error:".to_string()),
        }
    }
}

impl MarkerGrammar {
    /// A grammar that recognizes nothing; every text is a plain reply.
    pub fn none() -> Self {
        Self {
            escalation_sentinels: Vec::new(),
            input_block: None,
            error_prefix: None,
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.escalation_sentinels.iter().any(|s| s.trim().is_empty()) {
            return Err(RelayError::Configuration(
                "escalation sentinels must not be empty".to_string(),
            ));
        }
        if let Some(block) = &self.input_block {
            if block.start.trim().is_empty() || block.end.trim().is_empty() {
                return Err(RelayError::Configuration(
                    "input block markers must not be empty".to_string(),
                ));
            }
        }
        if matches!(&self.error_prefix, Some(prefix) if prefix.trim().is_empty()) {
            return Err(RelayError::Configuration(
                "error prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a completed piece of assistant text should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextClass {
    Reply(String),
    Escalation(String),
    Error(String),
    Empty,
}

const DEFAULT_ESCALATION_PROMPT: &str = "The agent needs more information to continue.";

/// Compiled form of a [`MarkerGrammar`].
#[derive(Debug, Clone)]
pub struct MarkerMatcher {
    grammar: MarkerGrammar,
    block: Option<Regex>,
}

impl MarkerMatcher {
    pub fn new(grammar: MarkerGrammar) -> Result<Self, RelayError> {
        grammar.validate()?;
        let block = match &grammar.input_block {
            Some(markers) => Some(Regex::new(&format!(
                r"(?s){}(.*?){}",
                regex::escape(&markers.start),
                regex::escape(&markers.end)
            ))?),
            None => None,
        };
        Ok(Self { grammar, block })
    }

    pub fn grammar(&self) -> &MarkerGrammar {
        &self.grammar
    }

    /// Classify a completed assistant message.
    ///
    /// Escalation markers win over the error prefix.
    pub fn classify(&self, text: &str) -> TextClass {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return TextClass::Empty;
        }

        if let Some(block) = &self.block {
            if let Some(captures) = block.captures(trimmed) {
                let prompt = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                return TextClass::Escalation(non_empty_prompt(prompt, trimmed));
            }
        }

        for sentinel in &self.grammar.escalation_sentinels {
            if let Some(pos) = trimmed.find(sentinel.as_str()) {
                let after = trimmed[pos + sentinel.len()..]
                    .trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())
                    .trim_end();
                let before = trimmed[..pos].trim();
                let prompt = if after.is_empty() { before } else { after };
                return TextClass::Escalation(non_empty_prompt(prompt, ""));
            }
        }

        if let Some(prefix) = &self.grammar.error_prefix {
            if trimmed.starts_with(prefix.as_str()) {
                return TextClass::Error(trimmed.to_string());
            }
        }

        TextClass::Reply(trimmed.to_string())
    }
}

fn non_empty_prompt(prompt: &str, fallback: &str) -> String {
    if !prompt.is_empty() {
        prompt.to_string()
    } else if !fallback.is_empty() {
        fallback.to_string()
    } else {
        DEFAULT_ESCALATION_PROMPT.to_string()
    }
}
