//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM providers (Ollama, OpenAI, Groq, etc.)
//! allowing the agent to work with any backend without code changes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentloop_core::provider::{GenerationOptions, LlmProvider};
//!
//! let provider = OllamaProvider::from_env()?;
//! let completion = provider.complete(&messages, &registry.schemas(), &options).await?;
//! if completion.tool_calls.is_empty() {
//!     println!("{}", completion.content);
//! }
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, MessageMetadata};
use crate::tool::{ToolCall, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4o-mini", "llama-3.3-70b-versatile")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
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

const fn default_temperature() -> f32 {
    0.7
}
const fn default_max_tokens() -> u32 {
    2048
}
const fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from an LLM completion: either a final answer or a request
/// to run one or more tools
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text (may be empty when only tool calls are returned)
    pub content: String,

    /// Tool calls requested by the model, in declaration order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Plain text answer
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            model: model.into(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }

    /// Convert into the assistant message appended to the conversation
    pub fn into_message(self) -> Message {
        Message::assistant_with_tool_calls(self.content, self.tool_calls).with_metadata(
            MessageMetadata {
                model: Some(self.model),
                usage: self.usage,
                ..Default::default()
            },
        )
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// A chunk from streaming completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The text delta
    pub delta: String,

    /// Tool calls completed in this chunk (usually only on the final one)
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Whether this is the final chunk
    pub done: bool,

    /// Token usage (typically only on final chunk)
    pub usage: Option<TokenUsage>,
}

/// Stream type for completion streaming
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Folds stream chunks into the `Completion` the non-streaming call returns
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<TokenUsage>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        self.content.push_str(&chunk.delta);
        self.tool_calls.extend(chunk.tool_calls.iter().cloned());
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    pub fn finish(self, model: impl Into<String>) -> Completion {
        let finish_reason = if self.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        Completion {
            content: self.content,
            tool_calls: self.tool_calls,
            model: model.into(),
            usage: self.usage,
            finish_reason: Some(finish_reason),
        }
    }
}

/// Drain a completion stream
pub async fn collect_stream(mut stream: CompletionStream, model: &str) -> Result<Completion> {
    let mut acc = StreamAccumulator::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        acc.push(&chunk);
        if chunk.done {
            break;
        }
    }
    Ok(acc.finish(model))
}

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "Ollama", "OpenAI")
    pub name: String,

    /// Provider version
    pub version: Option<String>,

    /// Available models
    pub models: Vec<ModelInfo>,

    /// Whether streaming is supported
    pub supports_streaming: bool,

    /// Whether tool/function calling is supported
    pub supports_tools: bool,
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<u32>,
    pub supports_vision: bool,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider information and capabilities
    async fn info(&self) -> Result<ProviderInfo>;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages, offering `tools` to the model
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Generate a streaming completion.
    ///
    /// The concatenated deltas must equal the `content` that `complete`
    /// returns for the same input.
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionStream>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Estimate token count for text (provider-specific tokenization)
    #[allow(clippy::cast_possible_truncation)]
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Default: rough estimate of ~4 chars per token
        (text.len() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, "llama3.2");
    }

    #[tokio::test]
    async fn test_collect_stream_concatenates() {
        let call = ToolCall::new("echo", json!({"text": "x"}));
        let chunks = vec![
            Ok(StreamChunk { delta: "Hel".into(), ..Default::default() }),
            Ok(StreamChunk { delta: "lo".into(), ..Default::default() }),
            Ok(StreamChunk {
                tool_calls: vec![call.clone()],
                done: true,
                ..Default::default()
            }),
        ];
        let stream: CompletionStream = Box::pin(futures::stream::iter(chunks));

        let completion = collect_stream(stream, "m").await.unwrap();
        assert_eq!(completion.content, "Hello");
        assert_eq!(completion.tool_calls, vec![call]);
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolUse));
    }

    #[test]
    fn test_completion_into_message() {
        let msg = Completion::text("hi", "llama3.2").into_message();
        assert_eq!(msg.content, "hi");
        assert_eq!(
            msg.metadata.and_then(|m| m.model).as_deref(),
            Some("llama3.2")
        );
    }
}
