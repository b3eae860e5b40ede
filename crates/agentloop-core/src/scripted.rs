//! Scripted LLM Provider
//!
//! Deterministic provider for tests, demos and offline runs. Responses come
//! from a closure over the conversation and offered tools, so scripts can
//! react to tool results the same way a real model would.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::provider::{
    Completion, CompletionStream, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo,
    StreamChunk,
};
use crate::tool::ToolSchema;

type Script = dyn Fn(&[Message], &[ToolSchema]) -> Result<Completion> + Send + Sync;

/// Provider whose answers are computed by a closure
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Arc<Script>,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[Message], &[ToolSchema]) -> Result<Completion> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
        }
    }

    /// Always answer with the same text
    pub fn echo(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(Completion::text(text.clone(), "scripted")))
    }
}

/// Split text into word fragments, keeping the separating whitespace
pub fn fragments(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(ToString::to_string)
        .collect()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Scripted".into(),
            version: None,
            models: self.list_models().await?,
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        _options: &GenerationOptions,
    ) -> Result<Completion> {
        (self.script)(messages, tools)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        _options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let completion = (self.script)(messages, tools)?;

        let mut chunks: Vec<Result<StreamChunk>> = fragments(&completion.content)
            .into_iter()
            .map(|delta| {
                Ok(StreamChunk {
                    delta,
                    ..Default::default()
                })
            })
            .collect();
        chunks.push(Ok(StreamChunk {
            delta: String::new(),
            tool_calls: completion.tool_calls,
            done: true,
            usage: completion.usage,
        }));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "scripted".into(),
            context_length: None,
            supports_vision: false,
        }])
    }
}
