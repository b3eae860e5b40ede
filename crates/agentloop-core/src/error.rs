//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Upstream model service unreachable, failing, or timed out
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream model service rejected the request for rate reasons
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Non-transient upstream error (bad request, auth, malformed response)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool name already registered
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// Tool schema rejected at registration
    #[error("Invalid schema for tool '{tool}': {reason}")]
    InvalidToolSchema { tool: String, reason: String },

    /// Tool call arguments do not match the tool's input schema
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Tool handler failed. Only ever surfaces inside a `ToolResult`.
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Session persistence error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parse error (e.g., provider response parsing)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Turn cancelled by the caller before commit
    #[error("Turn cancelled")]
    Cancelled,

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is transient and worth retrying
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Stable machine-readable code for API responses
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::UnknownTool(_) => "UNKNOWN_TOOL",
            Self::DuplicateTool(_) => "DUPLICATE_TOOL",
            Self::InvalidToolSchema { .. } => "INVALID_TOOL_SCHEMA",
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::ToolExecution(_) => "TOOL_EXECUTION",
            Self::Session(_) => "SESSION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Io(_) | Self::Json(_) | Self::Other(_) => "INTERNAL",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::UpstreamUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::UnknownTool(name) => format!("The tool '{name}' is not available."),
            Self::InvalidArguments { tool, reason } => {
                format!("The tool '{tool}' was called incorrectly: {reason}")
            }
            Self::Cancelled => "The request was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}
