//! Model Provider Contract
//!
//! Defines the boundary the execution loop consumes: given an ordered
//! message sequence, an optional tool catalog and sampling parameters, a
//! provider returns either a final textual answer or a request to invoke
//! tools. The two outcomes are a single tagged union so the loop's branch is
//! exhaustive and compiler-checked.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4.1-mini")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Accumulate another usage report into this one
    pub fn absorb(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Reason the provider stopped generating
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// The provider's reply: either a final answer or a tool-invocation request
#[derive(Clone, Debug)]
pub enum ModelReply {
    /// Final textual answer; the run is done
    Answer(String),
    /// One or more tool invocations to dispatch, in order
    ToolUse(Vec<ToolCall>),
}

/// Response from an LLM completion
#[derive(Clone, Debug)]
pub struct Completion {
    /// Tagged outcome of the turn
    pub reply: ModelReply,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if reported)
    pub usage: Option<TokenUsage>,
}

impl Completion {
    /// Finish reason as recorded in the execution trace
    pub fn finish_reason(&self) -> FinishReason {
        match self.reply {
            ModelReply::Answer(_) => FinishReason::Stop,
            ModelReply::ToolUse(_) => FinishReason::ToolCalls,
        }
    }
}

/// A chunk from a streaming completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The text delta
    pub delta: String,

    /// Whether this is the final chunk
    pub done: bool,

    /// Token usage (typically only on the final chunk)
    pub usage: Option<TokenUsage>,
}

/// Stream type for completion streaming
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Boundary trait wrapping the language-model provider call.
///
/// The execution loop works exclusively through this interface; implement it
/// to add a new backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate one completion. `tools` is the catalog offered to the model;
    /// pass an empty slice to disable tool calling for this turn.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Generate a streaming completion (text deltas only, no tool calling)
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.temperature, 0.7);
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, "gpt-4.1-mini");
    }

    #[test]
    fn test_usage_absorb() {
        let mut total = TokenUsage::default();
        total.absorb(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.absorb(TokenUsage {
            prompt_tokens: 20,
            completion_tokens: 1,
            total_tokens: 21,
        });
        assert_eq!(total.total_tokens, 36);
        assert_eq!(total.prompt_tokens, 30);
    }

    #[test]
    fn test_finish_reason_tracks_reply() {
        let answer = Completion {
            reply: ModelReply::Answer("4".into()),
            model: "m".into(),
            usage: None,
        };
        assert_eq!(answer.finish_reason(), FinishReason::Stop);

        let tool_use = Completion {
            reply: ModelReply::ToolUse(vec![]),
            model: "m".into(),
            usage: None,
        };
        assert_eq!(tool_use.finish_reason(), FinishReason::ToolCalls);
    }
}
