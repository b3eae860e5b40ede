//! DateTime Tool

use agentloop_core::{
    tool::{ParameterSchema, ToolArgs},
    Result, Tool, ToolSchema,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::json;

use crate::error::{self, ToolInputError};

/// Returns the current time
pub struct DateTimeTool;

/// Parse "UTC", "Z", or an offset like "+05:30" / "-0800"
pub fn parse_offset(tz: &str) -> error::Result<FixedOffset> {
    let tz = tz.trim();
    let invalid = || ToolInputError::Timezone(tz.to_string());
    if ["utc", "gmt", "z"].iter().any(|name| tz.eq_ignore_ascii_case(name)) {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match tz.chars().next() {
        Some('+') => (1, &tz[1..]),
        Some('-') => (-1, &tz[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.as_str(), "0"),
        4 => digits.split_at(2),
        _ => return Err(invalid()),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Render `now` in one of the supported formats
pub fn render(now: DateTime<Utc>, format: &str, offset: FixedOffset) -> String {
    let local = now.with_timezone(&offset);
    match format {
        "iso" => local.to_rfc3339(),
        "unix" => now.timestamp().to_string(),
        _ => local.format("%A, %B %d, %Y at %H:%M:%S %:z").to_string(),
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("datetime", "Get the current date and time")
            .param(
                ParameterSchema::optional(
                    "format",
                    "string",
                    "Output format: 'iso', 'human', or 'unix'",
                )
                .with_default(json!("human"))
                .with_enum(vec![json!("iso"), json!("human"), json!("unix")]),
            )
            .param(
                ParameterSchema::optional(
                    "timezone",
                    "string",
                    "UTC or a fixed offset such as '+05:30' (default: UTC)",
                )
                .with_default(json!("UTC")),
            )
            .category("time")
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String> {
        let format = args.str("format")?;
        let offset = parse_offset(args.str("timezone")?)?;
        Ok(render(Utc::now(), format, offset))
    }
}
