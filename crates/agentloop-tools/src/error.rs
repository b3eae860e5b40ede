//! Tool input errors

use agentloop_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolInputError>;

/// Ways a tool's input can be unusable even after schema validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolInputError {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("expected {expected} values, got {got}")]
    WrongCount { expected: usize, got: usize },

    #[error("{0} must be positive")]
    NotPositive(String),

    #[error("invalid expression: {0}")]
    Expression(String),

    #[error("result is too large to represent")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown timezone '{0}', use UTC or an offset like +05:30")]
    Timezone(String),
}

impl From<ToolInputError> for AgentError {
    fn from(err: ToolInputError) -> Self {
        Self::ToolExecution(err.to_string())
    }
}
