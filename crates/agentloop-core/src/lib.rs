//! # agentloop-core
//!
//! Tool-augmented conversational agent loop with a provider-agnostic LLM
//! abstraction, a validated tool registry and checkpointed sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐   │
//! │  │  Reasoning  │  │    Tool     │  │   LlmProvider       │   │
//! │  │    Loop     │──│  Registry   │──│   (Strategy)        │   │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘   │
//! │         │                                                    │
//! │  ┌─────────────────────────────┐                             │
//! │  │ SessionStore (checkpoints)  │                             │
//! │  └─────────────────────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Ollama, OpenAI-compatible
//! services, or the scripted provider without changing agent logic.

pub mod error;
pub mod file_store;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod retry;
pub mod scripted;
pub mod session;
pub mod tool;

pub use error::{AgentError, Result};
pub use file_store::JsonFileSessionStore;
pub use message::{Message, MessageMetadata, Role};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, TurnEvent, TurnOutcome};
pub use retry::{RetryPolicy, RetryingProvider};
pub use scripted::ScriptedProvider;
pub use session::{ConversationState, MemorySessionStore, SessionId, SessionStore};
pub use tool::{FnTool, ParameterSchema, Tool, ToolArgs, ToolCall, ToolRegistry, ToolResult, ToolSchema};
