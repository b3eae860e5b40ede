//! HTTP/WebSocket Handlers

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use agentloop_core::{
    provider::ModelInfo,
    session::SessionSummary,
    AgentError, ConversationState, SessionId, ToolCall, ToolResult, ToolSchema, TurnEvent,
    TurnOutcome,
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub model: String,
    pub provider_connected: bool,
    pub tools: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

impl ChatRequest {
    fn session_id(&self) -> SessionId {
        self.session_id
            .as_deref()
            .map_or_else(SessionId::new, SessionId::from)
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

const fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Frames sent over `/api/chat/stream`
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Delta { content: String },
    ToolCall { call: ToolCall },
    ToolResult { result: ToolResult },
    Done { outcome: TurnOutcome },
    Error { error: String, code: String },
}

impl From<TurnEvent> for StreamFrame {
    fn from(event: TurnEvent) -> Self {
        match event {
            TurnEvent::TextDelta { content } => Self::Delta { content },
            TurnEvent::ToolCallRequested { call } => Self::ToolCall { call },
            TurnEvent::ToolCompleted { result } => Self::ToolResult { result },
            TurnEvent::Completed { outcome } => Self::Done { outcome },
            TurnEvent::Failed { code, message } => Self::Error {
                error: message,
                code: code.into(),
            },
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

/// HTTP status for an agent failure
pub const fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        AgentError::UpstreamUnavailable(_) | AgentError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        // The model misbehaved: it asked for a missing tool or sent bad arguments
        AgentError::Provider(_)
        | AgentError::Parse(_)
        | AgentError::UnknownTool(_)
        | AgentError::InvalidArguments { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Agent(err) => status_for(err),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            Self::Agent(err) => ErrorResponse {
                error: err.user_message(),
                code: err.code().into(),
            },
            Self::BadRequest(msg) => ErrorResponse {
                error: msg.clone(),
                code: "BAD_REQUEST".into(),
            },
            Self::NotFound(msg) => ErrorResponse {
                error: msg.clone(),
                code: "NOT_FOUND".into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state
        .agent
        .provider()
        .health_check()
        .await
        .unwrap_or(false);

    Json(HealthResponse {
        status: if provider_connected { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.clone(),
        model: state.agent.config().generation.model.clone(),
        provider_connected,
        tools: state.agent.tools().len(),
    })
}

/// Models offered by the configured provider
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    Ok(Json(state.agent.provider().list_models().await?))
}

/// Schemas of every registered tool
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSchema>> {
    Json(state.agent.tools().schemas())
}

/// Run one turn and return its outcome
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }

    let session_id = payload.session_id();
    tracing::info!(session = %session_id, "Chat turn");

    let outcome = state.agent.send(&session_id, &payload.message).await?;
    Ok(Json(outcome))
}

/// Most recently updated sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(state.agent.store().list(query.limit).await?))
}

/// Full message log of one session
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationState>, ApiError> {
    let conversation = state.agent.store().load(&SessionId::from(id.as_str())).await?;
    if conversation.is_empty() {
        return Err(ApiError::NotFound(format!("session '{id}' not found")));
    }
    Ok(Json(conversation))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.agent.store().delete(&SessionId::from(id.as_str())).await? {
        tracing::info!(session = %id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session '{id}' not found")))
    }
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

type FrameSink = SplitSink<WebSocket, Message>;

async fn send_frame(sender: &mut FrameSink, frame: &StreamFrame) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!("Failed to encode stream frame: {}", e);
            Ok(())
        }
    }
}

fn bad_request_frame(error: impl Into<String>) -> StreamFrame {
    StreamFrame::Error {
        error: error.into(),
        code: "BAD_REQUEST".into(),
    }
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        let request: ChatRequest = match serde_json::from_str(&msg) {
            Ok(r) => r,
            Err(e) => {
                if send_frame(&mut sender, &bad_request_frame(e.to_string())).await.is_err() {
                    break;
                }
                continue;
            }
        };
        if request.message.trim().is_empty() {
            if send_frame(&mut sender, &bad_request_frame("message must not be empty"))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        let session_id = request.session_id();
        tracing::info!(session = %session_id, "Streaming chat turn");

        // Dropping `events` cancels the turn, so a vanished client commits nothing.
        let mut events = state.agent.send_stream(session_id, request.message);
        while let Some(event) = events.next().await {
            if send_frame(&mut sender, &StreamFrame::from(event)).await.is_err() {
                tracing::debug!("Client went away mid-turn");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agentloop_core::{AgentBuilder, Completion, ScriptedProvider};
    use agentloop_tools::default_registry;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let provider = ScriptedProvider::new(|messages, _| {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion::text(format!("You said: {last}"), "scripted"))
        });
        let agent = AgentBuilder::new()
            .provider(Arc::new(provider))
            .tools(default_registry().unwrap())
            .build()
            .unwrap();
        crate::router(AppState::new(agent, "scripted"))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_tools() {
        let app = app();

        let (status, health) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["provider"], "scripted");
        assert_eq!(health["tools"], 4);

        let (status, tools) = call(&app, Method::GET, "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["calculate", "datetime", "hypotenuse", "palindrome"]);

        let (status, models) = call(&app, Method::GET, "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(models[0]["id"], "scripted");
    }

    #[tokio::test]
    async fn test_chat_then_inspect_and_delete_session() {
        let app = app();

        let (status, outcome) = call(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"session_id": "s-1", "message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["session_id"], "s-1");
        assert_eq!(outcome["final_text"], "You said: hello");
        assert_eq!(outcome["round_trips"], 1);
        assert_eq!(outcome["truncated"], false);

        let (_, listed) = call(&app, Method::GET, "/api/sessions?limit=10", None).await;
        assert_eq!(listed[0]["session_id"], "s-1");

        let (status, session) = call(&app, Method::GET, "/api/sessions/s-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!session["messages"].as_array().unwrap().is_empty());

        let (status, _) = call(&app, Method::DELETE, "/api/sessions/s-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, Method::GET, "/api/sessions/s-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, _) = call(&app, Method::DELETE, "/api/sessions/s-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_generates_session_id() {
        let app = app();
        let (status, outcome) =
            call(&app, Method::POST, "/api/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!outcome["session_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let app = app();
        let (status, body) =
            call(&app, Method::POST, "/api/chat", Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AgentError::RateLimited("slow down".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&AgentError::UpstreamUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&AgentError::UnknownTool("teleport".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&AgentError::Session("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let body = ApiError::from(AgentError::UnknownTool("teleport".into())).body();
        assert_eq!(body.code, "UNKNOWN_TOOL");
        assert!(body.error.contains("teleport"));
    }

    #[test]
    fn test_stream_frames() {
        let frame = StreamFrame::from(TurnEvent::TextDelta {
            content: "Hi".into(),
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "delta", "content": "Hi"})
        );

        let frame = StreamFrame::from(TurnEvent::Failed {
            code: "RATE_LIMITED",
            message: "wait".into(),
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "error", "error": "wait", "code": "RATE_LIMITED"})
        );
    }
}
