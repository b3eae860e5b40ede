//! Tool System
//!
//! Tools are registered once, up front, with a schema that is validated at
//! registration time. The registry is the single place where tool failures
//! are turned into conversational content: `ToolRegistry::invoke` never lets
//! a handler error, panic or timeout escape.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, unique within a conversation
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Structured arguments (a JSON object)
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Fresh id for calls whose provider did not supply one
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

impl ToolCall {
    /// Create a call with a fresh id
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: generate_call_id(),
            name: name.into(),
            arguments,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Result from tool execution, paired 1:1 with a `ToolCall`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Originating call
    pub tool_call_id: String,

    /// Tool that was called
    pub name: String,

    /// Output text, or a human-readable error
    pub content: String,

    /// Whether `content` describes a failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: error.into(),
            is_error: true,
        }
    }
}

const PARAM_TYPES: [&str; 6] = ["string", "number", "integer", "boolean", "array", "object"];

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        let type_ok = match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => false,
        };
        type_ok
            && self
                .enum_values
                .as_ref()
                .is_none_or(|allowed| allowed.contains(value))
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,

    /// Category for grouping
    #[serde(default)]
    pub category: Option<String>,

    /// Whether tool has side effects
    #[serde(default)]
    pub has_side_effects: bool,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            category: None,
            has_side_effects: false,
        }
    }

    #[must_use]
    pub fn param(mut self, param: ParameterSchema) -> Self {
        self.parameters.push(param);
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Structural checks run once, at registration
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| AgentError::InvalidToolSchema {
            tool: self.name.clone(),
            reason,
        };

        let name_ok = !self.name.is_empty()
            && self.name.len() <= 64
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !name_ok {
            return Err(invalid(
                "name must be 1-64 characters of [A-Za-z0-9_-]".into(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(invalid("description is empty".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(invalid(format!("duplicate parameter '{}'", param.name)));
            }
            if !PARAM_TYPES.contains(&param.param_type.as_str()) {
                return Err(invalid(format!(
                    "parameter '{}' has unknown type '{}'",
                    param.name, param.param_type
                )));
            }
            if let Some(allowed) = &param.enum_values {
                let mut unconstrained = param.clone();
                unconstrained.enum_values = None;
                if allowed.is_empty() || !allowed.iter().all(|v| unconstrained.accepts(v)) {
                    return Err(invalid(format!(
                        "enum values of '{}' must be non-empty and of type {}",
                        param.name, param.param_type
                    )));
                }
            }
            if let Some(default) = &param.default {
                if param.required {
                    return Err(invalid(format!(
                        "required parameter '{}' cannot have a default",
                        param.name
                    )));
                }
                if !param.accepts(default) {
                    return Err(invalid(format!(
                        "default of '{}' does not match its type or enum",
                        param.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check call arguments and fill in defaults for omitted optional parameters
    pub fn validate_arguments(&self, arguments: &Value) -> Result<ToolArgs> {
        let invalid = |reason: String| AgentError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        let empty = Map::new();
        let provided = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(invalid(format!("expected a JSON object, got {other}")));
            }
        };

        if let Some(unknown) = provided
            .keys()
            .find(|key| !self.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(invalid(format!("unknown parameter '{unknown}'")));
        }

        let mut args = Map::new();
        for param in &self.parameters {
            match provided.get(&param.name) {
                Some(value) if param.accepts(value) => {
                    args.insert(param.name.clone(), value.clone());
                }
                Some(value) => {
                    return Err(invalid(format!(
                        "parameter '{}' expects {}{}, got {value}",
                        param.name,
                        param.param_type,
                        if param.enum_values.is_some() { " (enum)" } else { "" },
                    )));
                }
                None if param.required => {
                    return Err(invalid(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                None => {
                    if let Some(default) = &param.default {
                        args.insert(param.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(ToolArgs(args))
    }

    /// JSON Schema for native function-calling APIs
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(param.param_type.clone()));
            prop.insert("description".into(), Value::String(param.description.clone()));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }
        let required: Vec<Value> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::String(p.name.clone()))
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Validated tool arguments, handed to handlers
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ToolExecution(format!("argument '{name}' is not a string")))
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentError::ToolExecution(format!("argument '{name}' is not a number")))
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with arguments already validated against `schema()`
    async fn execute(&self, args: &ToolArgs) -> Result<String>;
}

type ToolHandler = Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Closure-backed tool
pub struct FnTool {
    schema: ToolSchema,
    handler: ToolHandler,
}

impl FnTool {
    pub fn new<F, Fut>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Wrap a synchronous handler
    pub fn sync<F>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(&ToolArgs) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self::new(schema, move |args| futures::future::ready(handler(&args)))
    }
}

#[async_trait]
impl Tool for FnTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String> {
        (self.handler)(args.clone()).await.map_err(AgentError::from)
    }
}

struct RegisteredTool {
    schema: ToolSchema,
    tool: Arc<dyn Tool>,
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every handler invocation; an overrun becomes an error result
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.schema();
        schema.validate()?;
        if self.tools.contains_key(&schema.name) {
            return Err(AgentError::DuplicateTool(schema.name));
        }
        tracing::debug!(tool = %schema.name, "Registered tool");
        self.tools
            .insert(schema.name.clone(), RegisteredTool { schema, tool });
        Ok(())
    }

    /// Look up a tool by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .map(|entry| entry.tool.clone())
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Schema captured at registration
    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name).map(|entry| &entry.schema)
    }

    /// Invoke a tool call.
    ///
    /// Fails only for `UnknownTool` and `InvalidArguments`. Anything that
    /// goes wrong inside the handler is reported in the returned result.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        let entry = self
            .tools
            .get(&call.name)
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;
        let args = entry.schema.validate_arguments(&call.arguments)?;

        let execution = AssertUnwindSafe(entry.tool.execute(&args)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(tool = %call.name, ?limit, "Tool timed out");
                    return Ok(ToolResult::failure(
                        &call.id,
                        &call.name,
                        format!("Error: tool '{}' timed out after {limit:?}", call.name),
                    ));
                }
            },
            None => execution.await,
        };

        let result = match outcome {
            Ok(Ok(output)) => ToolResult::success(&call.id, &call.name, output),
            Ok(Err(err)) => {
                tracing::warn!(tool = %call.name, error = %err, "Tool failed");
                let detail = match err {
                    AgentError::ToolExecution(msg) | AgentError::Other(msg) => msg,
                    other => other.to_string(),
                };
                ToolResult::failure(&call.id, &call.name, format!("Error: {detail}"))
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::warn!(tool = %call.name, %detail, "Tool panicked");
                ToolResult::failure(
                    &call.id,
                    &call.name,
                    format!("Error: tool '{}' panicked: {detail}", call.name),
                )
            }
        };
        Ok(result)
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema.clone()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generate system prompt section describing available tools
    pub fn generate_prompt_section(&self) -> String {
        use std::fmt::Write;

        let mut prompt = String::from("## Available Tools\n\n");
        for schema in self.schemas() {
            let _ = writeln!(prompt, "### {}", schema.name);
            let _ = writeln!(prompt, "{}", schema.description);

            if !schema.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    let _ = writeln!(
                        prompt,
                        "- `{}` ({}){}: {}",
                        param.name, param.param_type, required, param.description
                    );
                }
            }
            prompt.push('\n');
        }
        prompt
    }
}
