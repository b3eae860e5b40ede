//! Provider selection from the environment

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use agentloop_core::{
    error::{AgentError, Result},
    message::Role,
    provider::{Completion, LlmProvider},
    retry::{RetryPolicy, RetryingProvider},
    scripted::ScriptedProvider,
};

use crate::ollama::{OllamaConfig, OllamaProvider};
use crate::openai::{OpenAiCompatProvider, OpenAiConfig};

/// Supported backends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Groq,
    Gemini,
    HuggingFace,
    /// Offline echo provider, no network
    Scripted,
}

impl ProviderKind {
    /// Model used when `LLM_MODEL` is unset
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.2",
            Self::OpenAi => "gpt-4o-mini",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Gemini => "gemini-2.0-flash",
            Self::HuggingFace => "meta-llama/Llama-3.3-70B-Instruct",
            Self::Scripted => "scripted",
        }
    }

    /// Environment variable holding the API key, if the backend needs one
    pub const fn key_var(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::HuggingFace => Some("HF_TOKEN"),
            Self::Ollama | Self::Scripted => None,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "gemini" => Ok(Self::Gemini),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "scripted" | "offline" => Ok(Self::Scripted),
            other => Err(AgentError::Config(format!("unknown LLM_PROVIDER '{other}'"))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Gemini => "gemini",
            Self::HuggingFace => "huggingface",
            Self::Scripted => "scripted",
        };
        f.write_str(name)
    }
}

/// Everything needed to construct the configured provider
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub timeout: Duration,
    /// Retries after the first attempt on transient failures
    pub max_retries: u32,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            model: ProviderKind::Ollama.default_model().into(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl ProviderSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `get`; unset or empty variables use defaults
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let kind = get("LLM_PROVIDER")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(ProviderKind::Ollama);
        let model = get("LLM_MODEL").unwrap_or_else(|| kind.default_model().into());
        let timeout_secs = parse_var(&get, "LLM_TIMEOUT_SECS")?.unwrap_or(120);
        let max_retries = parse_var(&get, "LLM_MAX_RETRIES")?.unwrap_or(2);

        let api_key = kind.key_var().and_then(&get);
        let openai = match kind {
            ProviderKind::Groq => OpenAiConfig::groq(api_key),
            ProviderKind::Gemini => OpenAiConfig::gemini(api_key),
            ProviderKind::HuggingFace => OpenAiConfig::huggingface(api_key),
            _ => OpenAiConfig::from_lookup(&get),
        }
        .with_timeout_secs(timeout_secs);

        Ok(Self {
            kind,
            model,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            ollama: OllamaConfig::from_lookup(&get),
            openai,
        })
    }

    /// Backoff policy derived from `max_retries`
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            RetryPolicy::none()
        } else {
            RetryPolicy {
                max_attempts: self.max_retries.saturating_add(1),
                ..RetryPolicy::default()
            }
        }
    }

    /// Construct the provider, wrapped in retry with backoff
    pub fn build(&self) -> Result<Arc<dyn LlmProvider>> {
        let inner: Arc<dyn LlmProvider> = match self.kind {
            ProviderKind::Ollama => Arc::new(OllamaProvider::from_config(self.ollama.clone())?),
            ProviderKind::OpenAi
            | ProviderKind::Groq
            | ProviderKind::Gemini
            | ProviderKind::HuggingFace => {
                if self.openai.api_key.is_none() {
                    if let Some(var) = self.kind.key_var() {
                        tracing::warn!(provider = %self.kind, "{var} is not set");
                    }
                }
                Arc::new(OpenAiCompatProvider::new(self.openai.clone())?)
            }
            ProviderKind::Scripted => return Ok(Arc::new(offline_provider())),
        };

        tracing::info!(provider = %self.kind, model = %self.model, "Configured LLM provider");
        Ok(Arc::new(RetryingProvider::new(inner, self.retry_policy())))
    }
}

fn parse_var<T: FromStr>(get: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("{key} has invalid value '{raw}'")))
        })
        .transpose()
}

/// Echoes the latest user message back; useful for wiring checks without a model
fn offline_provider() -> ScriptedProvider {
    ScriptedProvider::new(|messages, _| {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str());
        Ok(Completion::text(format!("You said: {last_user}"), "scripted"))
    })
}
