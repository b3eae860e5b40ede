//! # agentloop-runtime
//!
//! Runtime providers for the agentloop system.
//!
//! ## Providers
//!
//! - **Ollama** (default): Local LLM inference via `ollama-rs`
//! - **OpenAI-compatible**: OpenAI, Groq, Gemini and the Hugging Face router
//! - **Scripted**: offline echo provider for demos
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentloop_runtime::ProviderSettings;
//!
//! let settings = ProviderSettings::from_env()?;
//! let agent = AgentBuilder::new()
//!     .provider(settings.build()?)
//!     .model(&settings.model)
//!     .build()?;
//! ```

pub mod config;
pub mod ollama;
pub mod openai;
mod wire;

pub use config::{ProviderKind, ProviderSettings};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiCompatProvider, OpenAiConfig};

// Re-export core types for convenience
pub use agentloop_core::{
    Agent, AgentError, LlmProvider, Message, Result, Role, Tool, ToolRegistry,
};
