//! Palindrome Tool

use agentloop_core::{
    tool::{ParameterSchema, ToolArgs},
    Result, Tool, ToolSchema,
};
use async_trait::async_trait;

/// Checks whether text reads the same backwards, ignoring case, spaces and
/// punctuation
pub struct PalindromeTool;

/// `true` for empty input and single characters
pub fn is_palindrome(text: &str) -> bool {
    let normalized: Vec<char> = text
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    normalized.iter().eq(normalized.iter().rev())
}

#[async_trait]
impl Tool for PalindromeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "palindrome",
            "Check whether a word or phrase is a palindrome. Case, spaces and punctuation are ignored.",
        )
        .param(ParameterSchema::required(
            "text",
            "string",
            "The word or phrase to check (e.g., 'level')",
        ))
        .category("text")
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String> {
        let text = args.str("text")?;
        let verdict = if is_palindrome(text) { "is" } else { "is not" };
        Ok(format!("'{text}' {verdict} a palindrome."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_palindrome() {
        assert!(is_palindrome("level"));
        assert!(is_palindrome("Was it a car or a cat I saw?"));
        assert!(is_palindrome("Ésé"));
        assert!(is_palindrome(""));
        assert!(!is_palindrome("rust"));
    }
}
