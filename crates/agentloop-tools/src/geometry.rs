//! Hypotenuse Tool
//!
//! Takes the two legs of a right triangle as free text, the way users type
//! them ("3, 4", "3 4", "3.5,12").

use agentloop_core::{
    tool::{ParameterSchema, ToolArgs},
    Result, Tool, ToolSchema,
};
use async_trait::async_trait;

use crate::error::{self, ToolInputError};

pub struct HypotenuseTool;

/// Parse a list of numbers separated by commas and/or whitespace
pub fn parse_numbers(input: &str) -> error::Result<Vec<f64>> {
    input
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| ToolInputError::NotANumber(s.to_string()))
        })
        .collect()
}

/// Length of the hypotenuse for legs `a` and `b`
pub fn hypotenuse(a: f64, b: f64) -> error::Result<f64> {
    for (name, side) in [("first side", a), ("second side", b)] {
        if side <= 0.0 {
            return Err(ToolInputError::NotPositive(name.into()));
        }
    }
    let length = a.hypot(b);
    if length.is_finite() {
        Ok(length)
    } else {
        Err(ToolInputError::Overflow)
    }
}

/// Render with at least one decimal place: 5 -> "5.0", 2.5 -> "2.5"
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        let rounded = format!("{value:.6}");
        let trimmed = rounded.trim_end_matches('0');
        if trimmed.ends_with('.') {
            format!("{trimmed}0")
        } else {
            trimmed.to_string()
        }
    }
}

#[async_trait]
impl Tool for HypotenuseTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "hypotenuse",
            "Compute the hypotenuse of a right triangle from the lengths of its two legs.",
        )
        .param(ParameterSchema::required(
            "sides",
            "string",
            "The two leg lengths separated by a comma (e.g., '3, 4')",
        ))
        .category("math")
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String> {
        let numbers = parse_numbers(args.str("sides")?)?;
        let &[a, b] = numbers.as_slice() else {
            return Err(ToolInputError::WrongCount {
                expected: 2,
                got: numbers.len(),
            }
            .into());
        };
        let c = hypotenuse(a, b)?;
        tracing::debug!(a, b, c, "Computed hypotenuse");
        Ok(format_number(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_core::{AgentError, ToolCall, ToolRegistry};
    use serde_json::json;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_numbers("3, 4").unwrap(), vec![3.0, 4.0]);
        assert_eq!(parse_numbers(" 3 4 ").unwrap(), vec![3.0, 4.0]);
        assert_eq!(parse_numbers("1.5;2").unwrap(), vec![1.5, 2.0]);
        assert_eq!(
            parse_numbers("abc"),
            Err(ToolInputError::NotANumber("abc".into()))
        );
        assert!(parse_numbers("inf, 2").is_err());
    }

    #[test]
    fn test_hypotenuse() {
        assert_eq!(format_number(hypotenuse(3.0, 4.0).unwrap()), "5.0");
        assert_eq!(format_number(hypotenuse(5.0, 12.0).unwrap()), "13.0");
        assert_eq!(format_number(hypotenuse(1.0, 1.0).unwrap()), "1.414214");
        assert!(hypotenuse(-3.0, 4.0).is_err());
        assert_eq!(hypotenuse(1e308, 1e308), Err(ToolInputError::Overflow));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.0), "0.0");
    }

    #[tokio::test]
    async fn test_execute_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(HypotenuseTool).unwrap();

        let ok = registry
            .invoke(&ToolCall::new("hypotenuse", json!({"sides": "3, 4"})))
            .await
            .unwrap();
        assert!(!ok.is_error);
        assert_eq!(ok.content, "5.0");

        let bad = registry
            .invoke(&ToolCall::new("hypotenuse", json!({"sides": "abc"})))
            .await
            .unwrap();
        assert!(bad.is_error);
        assert!(bad.content.starts_with("Error:"));
        assert!(bad.content.contains("'abc' is not a number"));

        let one = registry
            .invoke(&ToolCall::new("hypotenuse", json!({"sides": "3"})))
            .await
            .unwrap();
        assert!(one.content.contains("expected 2 values, got 1"));

        let huge = registry
            .invoke(&ToolCall::new("hypotenuse", json!({"sides": "1e308, 1e308"})))
            .await
            .unwrap();
        assert!(huge.is_error);
        assert!(huge.content.contains("too large"));

        assert!(matches!(
            registry
                .invoke(&ToolCall::new("hypotenuse", json!({"legs": "3, 4"})))
                .await,
            Err(AgentError::InvalidArguments { .. })
        ));
    }
}
