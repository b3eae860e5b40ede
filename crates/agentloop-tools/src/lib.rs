//! # agentloop-tools
//!
//! Ready-made tools for the agentloop agent.
//!
//! | Tool         | Input                    | Output                          |
//! |--------------|--------------------------|---------------------------------|
//! | `palindrome` | `text`                   | `'level' is a palindrome.`      |
//! | `hypotenuse` | `sides` ("3, 4")         | `5.0`                           |
//! | `calculate`  | `expression`             | `2 + 2 = 4.0`                   |
//! | `datetime`   | `format`, `timezone`     | `Friday, March 01, 2024 at ...` |
//!
//! Malformed input is reported as an error, which the registry turns into an
//! error tool result the model can read and recover from.

pub mod calculator;
pub mod clock;
pub mod error;
pub mod geometry;
pub mod palindrome;

use agentloop_core::{Result, ToolRegistry};

pub use error::ToolInputError;

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::calculator::CalculatorTool;
    pub use crate::clock::DateTimeTool;
    pub use crate::geometry::HypotenuseTool;
    pub use crate::palindrome::PalindromeTool;
}

/// Register every built-in tool
pub fn register_all(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(tools::PalindromeTool)?;
    registry.register(tools::HypotenuseTool)?;
    registry.register(tools::CalculatorTool)?;
    registry.register(tools::DateTimeTool)?;
    Ok(())
}

/// Registry holding every built-in tool
pub fn default_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_all(&mut registry)?;
    Ok(registry)
}

/// System prompt for an agent equipped with these tools
pub const TOOLS_PROMPT: &str = r"You are a precise assistant with access to a small set of tools.

## When to Use Tools

- Palindrome questions: call `palindrome` with the exact word or phrase.
- Right triangles: call `hypotenuse` with the two leg lengths, e.g. `3, 4`.
- Arithmetic: call `calculate` instead of computing in your head.
- Current date or time: call `datetime`.

## Using Results

- Report the tool's result directly, including its number format (say 5.0, not 5).
- If a tool result starts with `Error:`, explain the problem to the user and
  ask for corrected input instead of guessing.
- Answer directly when no tool applies.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = default_registry().unwrap();
        assert_eq!(
            registry.names(),
            vec!["calculate", "datetime", "hypotenuse", "palindrome"]
        );
        assert!(registry.generate_prompt_section().contains("### hypotenuse"));
    }

    #[test]
    fn test_register_twice_is_duplicate() {
        let mut registry = default_registry().unwrap();
        assert!(matches!(
            register_all(&mut registry),
            Err(agentloop_core::AgentError::DuplicateTool(_))
        ));
    }
}
