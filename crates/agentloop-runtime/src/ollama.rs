//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference through
//! `ollama-rs`, including native function tools and streaming chat.

use std::time::Duration;

use agentloop_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, CompletionStream, FinishReason, GenerationOptions, LlmProvider, ModelInfo,
        ProviderInfo, StreamChunk, TokenUsage,
    },
    tool::{generate_call_id, ToolCall, ToolSchema},
};
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    generation::{
        chat::{request::ChatMessageRequest, ChatMessage, ChatMessageResponse, MessageRole},
        tools::{ToolCall as OllamaToolCall, ToolCallFunction, ToolInfo},
    },
    models::ModelOptions,
    Ollama,
};
use reqwest::Url;
use serde_json::Value;

use crate::wire::{self, FunctionTool};

const NAME: &str = "Ollama";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `get`, falling back to defaults
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let host = get("OLLAMA_HOST").unwrap_or(defaults.host);
        let port = get("OLLAMA_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let timeout_secs = get("LLM_TIMEOUT_SECS")
            .and_then(|t| t.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            host,
            port,
            timeout_secs,
        }
    }

    /// Host with a scheme, e.g. `http://localhost`
    pub fn host_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        }
    }

    /// Base URL, e.g. `http://localhost:11434`
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host_url(), self.port)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        // `Ollama` panics on hosts it cannot turn into a URL, so check first.
        let host = Url::parse(&config.host_url())
            .ok()
            .filter(|url| !url.cannot_be_a_base() && url.host_str().is_some())
            .ok_or_else(|| AgentError::Config(format!("invalid OLLAMA_HOST '{}'", config.host)))?;
        let http = wire::client(config.timeout())?;
        tracing::debug!(url = %config.base_url(), "Ollama client configured");

        Ok(Self {
            client: Ollama::new_with_client(host, config.port, http),
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                    Role::Tool => MessageRole::Tool,
                };
                let mut message = ChatMessage::new(role, m.content.clone());
                message.tool_calls = m
                    .tool_calls
                    .iter()
                    .map(|call| OllamaToolCall {
                        function: ToolCallFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect();
                message
            })
            .collect()
    }

    /// Tool schema in the shape Ollama expects
    fn tool_info(schema: &ToolSchema) -> Result<ToolInfo> {
        let value = serde_json::to_value(FunctionTool::from(schema))?;
        serde_json::from_value(value).map_err(|e| {
            AgentError::InvalidToolSchema {
                tool: schema.name.clone(),
                reason: format!("not representable as an Ollama tool: {e}"),
            }
        })
    }

    /// Build Ollama model options
    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        let options = ModelOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX));
        if opts.stop_sequences.is_empty() {
            options
        } else {
            options.stop(opts.stop_sequences.clone())
        }
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<ChatMessageRequest> {
        let request =
            ChatMessageRequest::new(options.model.clone(), Self::convert_messages(messages))
                .options(Self::build_options(options));
        if tools.is_empty() {
            return Ok(request);
        }
        let tools = tools.iter().map(Self::tool_info).collect::<Result<Vec<_>>>()?;
        Ok(request.tools(tools))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: NAME.into(),
            version: None, // Not exposed through ollama-rs
            models,
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = Self::build_request(messages, tools, options)?;
        tracing::debug!(model = %options.model, messages = messages.len(), tools = tools.len(), "Ollama chat request");

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| ollama_error(&e))?;

        let usage = token_usage(&response);
        Ok(into_completion(response.message, &options.model, usage))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let request = Self::build_request(messages, tools, options)?;

        let stream = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| ollama_error(&e))?;

        let chunks = stream.map(|result| {
            result
                .map(|response| {
                    let usage = token_usage(&response);
                    StreamChunk {
                        done: response.done,
                        delta: response.message.content,
                        tool_calls: convert_tool_calls(response.message.tool_calls),
                        usage,
                    }
                })
                .map_err(|e| AgentError::Provider(format!("Ollama stream failed: {e:?}")))
        });

        Ok(Box::pin(chunks))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| ollama_error(&e))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None, // Not exposed by the tags listing
                supports_vision: false,
            })
            .collect())
    }
}

/// Classify an `ollama-rs` failure, looking through it for the HTTP cause
fn ollama_error<E: std::error::Error + 'static>(err: &E) -> AgentError {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(inner) = cause {
        if let Some(http) = inner.downcast_ref::<reqwest::Error>() {
            return wire::transport_error(NAME, http);
        }
        cause = inner.source();
    }
    AgentError::Provider(format!("{NAME}: {err}"))
}

/// Token counts from the final record of a chat response
fn token_usage(response: &ChatMessageResponse) -> Option<TokenUsage> {
    let data = response.final_data.as_ref()?;
    let count = |n: u64| u32::try_from(n).unwrap_or(u32::MAX);
    let prompt_tokens = count(data.prompt_eval_count);
    let completion_tokens = count(data.eval_count);
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens.saturating_add(completion_tokens),
    })
}

fn convert_tool_calls(calls: Vec<OllamaToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|call| {
            // Some models send the arguments as an encoded JSON string.
            let arguments = match call.function.arguments {
                Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                other => other,
            };
            ToolCall::new(call.function.name, arguments).with_id(generate_call_id())
        })
        .collect()
}

fn into_completion(message: ChatMessage, model: &str, usage: Option<TokenUsage>) -> Completion {
    let tool_calls = convert_tool_calls(message.tool_calls);
    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolUse
    };

    Completion {
        content: message.content,
        tool_calls,
        model: model.to_string(),
        usage,
        finish_reason: Some(finish_reason),
    }
}
