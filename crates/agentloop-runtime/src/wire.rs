//! HTTP plumbing shared by the providers

use std::time::Duration;

use agentloop_core::error::{AgentError, Result};
use agentloop_core::tool::ToolSchema;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

/// Build an HTTP client with the provider's connect timeout.
///
/// The overall request timeout is applied per request so streaming bodies
/// are not cut off.
pub fn client(connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}

/// Classify a transport-level failure
pub fn transport_error(provider: &str, err: &reqwest::Error) -> AgentError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        AgentError::UpstreamUnavailable(format!("{provider}: {err}"))
    } else if err.is_decode() {
        AgentError::Parse(format!("{provider}: {err}"))
    } else {
        AgentError::Provider(format!("{provider}: {err}"))
    }
}

/// Classify a non-success HTTP status
pub fn status_error(provider: &str, status: StatusCode, body: &str) -> AgentError {
    let detail = format!("{provider} returned {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        AgentError::RateLimited(detail)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        AgentError::UpstreamUnavailable(detail)
    } else {
        AgentError::Provider(detail)
    }
}

/// Pass successful responses through, turn the rest into errors
pub async fn ensure_success(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, %status, "Upstream request failed");
    Err(status_error(provider, status, &body))
}

/// `{"type": "function", "function": {...}}` tool entry understood by both
/// Ollama and OpenAI-compatible APIs
#[derive(Debug, Serialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDef,
}

#[derive(Debug, Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolSchema> for FunctionTool {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            kind: "function",
            function: FunctionDef {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.json_schema(),
            },
        }
    }
}
