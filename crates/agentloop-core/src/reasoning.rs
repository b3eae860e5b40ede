//! Reasoning Loop
//!
//! Implements the ReAct (Reason + Act) pattern as an explicit state machine:
//!
//! ```text
//!            ┌────────────── tool results appended ──────────────┐
//!            ▼                                                   │
//!   ┌────────────────┐  tool calls   ┌──────────────────┐        │
//!   │ AwaitingModel  │──────────────▶│ ExecutingTools   │────────┘
//!   └────────────────┘               └──────────────────┘
//!            │ no tool calls / round-trip cap
//!            ▼
//!        ┌────────┐
//!        │  Done  │
//!        └────────┘
//! ```
//!
//! A turn runs on the state loaded from the session store and is written back
//! only once it completes, so a failed or cancelled turn leaves the stored
//! conversation untouched.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::message::{Message, MessageMetadata};
use crate::provider::{Completion, GenerationOptions, LlmProvider, StreamAccumulator};
use crate::session::{ConversationState, MemorySessionStore, SessionId, SessionStore};
use crate::tool::{generate_call_id, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt placed at the head of new conversations
    pub system_prompt: Option<String>,

    /// Maximum model calls in a single turn
    pub max_round_trips: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Whether to append tool descriptions to the system prompt
    /// (for providers without native tool calling)
    pub inject_tool_descriptions: bool,

    /// Upper bound on a single model call
    pub model_timeout: Option<Duration>,

    /// Turn unknown-tool and invalid-argument errors into error tool results
    /// instead of failing the turn
    pub recover_tool_errors: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.into()),
            max_round_trips: 10,
            generation: GenerationOptions::default(),
            inject_tool_descriptions: false,
            model_timeout: None,
            recover_tool_errors: false,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.

Use the provided tools whenever they help answer the question.
After receiving tool results, use them to write the final answer.
If you can answer directly without tools, do so.
Be concise and accurate.";

/// Position of the loop within a turn
#[derive(Clone, Debug, PartialEq)]
pub enum LoopState {
    /// Next step is a model call
    AwaitingModel,
    /// The last assistant message requested these calls
    ExecutingTools(Vec<ToolCall>),
    /// Terminal; carries the final assistant message
    Done(Message),
}

/// Result of one user turn
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub session_id: SessionId,

    /// Content of the final assistant message
    pub final_text: String,

    /// Messages appended by this turn, in order (user message first)
    pub trace: Vec<Message>,

    /// Model calls made
    pub round_trips: usize,

    /// The round-trip cap ended the turn
    pub truncated: bool,
}

/// Incremental progress of a streamed turn
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TextDelta { content: String },
    ToolCallRequested { call: ToolCall },
    ToolCompleted { result: ToolResult },
    Completed { outcome: TurnOutcome },
    Failed { code: &'static str, message: String },
}

/// Stream of events for one turn; always ends with `Completed` or `Failed`
pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

struct EventSink(mpsc::Sender<TurnEvent>);

impl EventSink {
    async fn emit(&self, event: TurnEvent) -> Result<()> {
        self.0.send(event).await.map_err(|_| AgentError::Cancelled)
    }
}

/// The main Agent struct
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    config: Arc<AgentConfig>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            config: Arc::new(config),
        }
    }

    /// Create with default configuration and an in-memory session store
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(
            provider,
            tools,
            Arc::new(MemorySessionStore::new()),
            AgentConfig::default(),
        )
    }

    /// Build the full system prompt including tool descriptions
    fn build_system_prompt(&self) -> Option<String> {
        let mut prompt = self.config.system_prompt.clone();

        if self.config.inject_tool_descriptions && !self.tools.is_empty() {
            let section = self.tools.generate_prompt_section();
            prompt = Some(match prompt {
                Some(base) => format!("{base}\n\n{section}"),
                None => section,
            });
        }
        prompt
    }

    /// Send a user message to a session and run the turn to completion.
    ///
    /// The session is locked for the whole turn and saved once at the end.
    pub async fn send(&self, session_id: &SessionId, user_text: &str) -> Result<TurnOutcome> {
        self.execute_turn(session_id, user_text, &CancellationToken::new(), None)
            .await
    }

    /// Like `send`, but abandons the turn without committing anything once
    /// `cancel` fires
    pub async fn send_cancellable(
        &self,
        session_id: &SessionId,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.execute_turn(session_id, user_text, cancel, None).await
    }

    /// Streaming variant of `send`.
    ///
    /// Must be called from within a Tokio runtime. Dropping the stream
    /// cancels the turn; nothing is committed in that case.
    pub fn send_stream(&self, session_id: SessionId, user_text: impl Into<String>) -> TurnStream {
        let (tx, rx) = mpsc::channel(64);
        let agent = self.clone();
        let user_text = user_text.into();

        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let watcher = {
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tx.closed().await;
                    cancel.cancel();
                })
            };

            let sink = EventSink(tx);
            let result = agent
                .execute_turn(&session_id, &user_text, &cancel, Some(&sink))
                .await;
            watcher.abort();

            let last = match result {
                Ok(outcome) => TurnEvent::Completed { outcome },
                Err(e) => TurnEvent::Failed {
                    code: e.code(),
                    message: e.user_message(),
                },
            };
            // The consumer may already be gone.
            let _ = sink.emit(last).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Run a full turn on a caller-managed state.
    ///
    /// `state` is only modified if the turn succeeds.
    pub async fn run(&self, state: &mut ConversationState, user_text: &str) -> Result<TurnOutcome> {
        let mut working = state.clone();
        let outcome = self.advance(&mut working, user_text, None).await?;
        *state = working;
        Ok(outcome)
    }

    /// Ask a one-off question without touching the session store
    pub async fn ask(&self, question: &str) -> Result<String> {
        let mut state = ConversationState::new(SessionId::new());
        let outcome = self.advance(&mut state, question, None).await?;
        Ok(outcome.final_text)
    }

    async fn execute_turn(
        &self,
        session_id: &SessionId,
        user_text: &str,
        cancel: &CancellationToken,
        events: Option<&EventSink>,
    ) -> Result<TurnOutcome> {
        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            guard = self.store.lock(session_id) => guard,
        };
        let mut state = self.store.load(session_id).await?;
        let before = state.len();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(session = %session_id, "Turn cancelled, nothing committed");
                return Err(AgentError::Cancelled);
            }
            outcome = self.advance(&mut state, user_text, events) => outcome?,
        };

        debug_assert!(state.len() > before);
        debug_assert!(state.unresolved_tool_calls().is_empty());
        self.store.save(&state).await?;
        tracing::debug!(
            session = %session_id,
            round_trips = outcome.round_trips,
            messages = state.len(),
            "Turn committed"
        );
        Ok(outcome)
    }

    /// Append the user message and drive the state machine to `Done`
    async fn advance(
        &self,
        state: &mut ConversationState,
        user_text: &str,
        events: Option<&EventSink>,
    ) -> Result<TurnOutcome> {
        if state.is_empty() {
            if let Some(prompt) = self.build_system_prompt() {
                state.push(Message::system(prompt));
            }
        }
        let start = state.len();
        state.push(Message::user(user_text));

        let tools = self.tools.schemas();
        let mut round_trips = 0;
        let mut truncated = false;
        let mut loop_state = LoopState::AwaitingModel;

        let final_message = loop {
            loop_state = match loop_state {
                LoopState::AwaitingModel if round_trips >= self.config.max_round_trips => {
                    tracing::warn!(
                        session = %state.session_id,
                        max_round_trips = self.config.max_round_trips,
                        "Round-trip cap reached, truncating turn"
                    );
                    truncated = true;
                    let notice = Message::assistant(format!(
                        "[truncated] Stopped after {} model round trips without a final answer.",
                        self.config.max_round_trips
                    ))
                    .with_metadata(MessageMetadata {
                        truncated: true,
                        ..Default::default()
                    });
                    state.push(notice.clone());
                    LoopState::Done(notice)
                }
                LoopState::AwaitingModel => {
                    round_trips += 1;
                    let completion = self.call_model(state.messages(), &tools, events).await?;
                    let message = normalize(completion).into_message();
                    state.push(message.clone());

                    if message.has_tool_calls() {
                        LoopState::ExecutingTools(message.tool_calls.clone())
                    } else {
                        LoopState::Done(message)
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    for call in calls {
                        if let Some(sink) = events {
                            sink.emit(TurnEvent::ToolCallRequested { call: call.clone() })
                                .await?;
                        }
                        let result = self.invoke_tool(&call).await?;
                        state.push(Message::tool(&result));
                        if let Some(sink) = events {
                            sink.emit(TurnEvent::ToolCompleted { result }).await?;
                        }
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done(message) => break message,
            };
        };

        Ok(TurnOutcome {
            session_id: state.session_id.clone(),
            final_text: final_message.content,
            trace: state.messages()[start..].to_vec(),
            round_trips,
            truncated,
        })
    }

    async fn call_model(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        events: Option<&EventSink>,
    ) -> Result<Completion> {
        let options = &self.config.generation;
        tracing::debug!(model = %options.model, messages = messages.len(), "Calling model");

        let request = async {
            let Some(sink) = events else {
                return self.provider.complete(messages, tools, options).await;
            };

            let mut stream = self.provider.complete_stream(messages, tools, options).await?;
            let mut acc = StreamAccumulator::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if !chunk.delta.is_empty() {
                    sink.emit(TurnEvent::TextDelta {
                        content: chunk.delta.clone(),
                    })
                    .await?;
                }
                acc.push(&chunk);
                if chunk.done {
                    break;
                }
            }
            Ok(acc.finish(options.model.clone()))
        };

        match self.config.model_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                AgentError::UpstreamUnavailable(format!("model call timed out after {limit:?}"))
            })?,
            None => request.await,
        }
    }

    async fn invoke_tool(&self, call: &ToolCall) -> Result<ToolResult> {
        tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");
        match self.tools.invoke(call).await {
            Err(e @ (AgentError::UnknownTool(_) | AgentError::InvalidArguments { .. }))
                if self.config.recover_tool_errors =>
            {
                tracing::warn!(tool = %call.name, error = %e, "Recovering from tool error");
                Ok(ToolResult::failure(&call.id, &call.name, format!("Error: {e}")))
            }
            other => other,
        }
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the session store
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Get the provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Give every tool call a usable id
fn normalize(mut completion: Completion) -> Completion {
    for call in &mut completion.tool_calls {
        if call.id.trim().is_empty() {
            call.id = generate_call_id();
        }
    }
    completion
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    store: Option<Arc<dyn SessionStore>>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            store: None,
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register a tool; fails on duplicates or an invalid schema
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn no_system_prompt(mut self) -> Self {
        self.config.system_prompt = None;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_round_trips(mut self, max: usize) -> Self {
        self.config.max_round_trips = max;
        self
    }

    #[must_use]
    pub const fn model_timeout(mut self, timeout: Duration) -> Self {
        self.config.model_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn recover_tool_errors(mut self, recover: bool) -> Self {
        self.config.recover_tool_errors = recover;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        if self.config.max_round_trips == 0 {
            return Err(AgentError::Config("max_round_trips must be at least 1".into()));
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));

        Ok(Agent::new(provider, Arc::new(self.tools), store, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::provider::{CompletionStream, ModelInfo, ProviderInfo};
    use crate::scripted::ScriptedProvider;
    use crate::tool::{FnTool, ParameterSchema};
    use async_trait::async_trait;
    use serde_json::json;

    fn last_role(messages: &[Message]) -> Role {
        messages.last().map_or(Role::User, |m| m.role)
    }

    fn upper_tool() -> FnTool {
        FnTool::sync(
            ToolSchema::new("upper", "Uppercase text")
                .param(ParameterSchema::required("text", "string", "Text")),
            |args| Ok(args.str("text")?.to_uppercase()),
        )
    }

    /// Calls `upper` twice in one message, then answers with the results.
    fn two_call_provider() -> ScriptedProvider {
        ScriptedProvider::new(|messages, _| {
            if last_role(messages) == Role::User {
                return Ok(Completion {
                    tool_calls: vec![
                        ToolCall::new("upper", json!({"text": "a"})).with_id("first"),
                        ToolCall::new("upper", json!({"text": "b"})).with_id("second"),
                    ],
                    ..Completion::text("", "scripted")
                });
            }
            let results: Vec<_> = messages
                .iter()
                .rev()
                .take_while(|m| m.role == Role::Tool)
                .map(|m| m.content.clone())
                .collect();
            Ok(Completion::text(format!("got {}", results.join("+")), "scripted"))
        })
    }

    fn agent_with(provider: ScriptedProvider) -> Agent {
        AgentBuilder::new()
            .provider(Arc::new(provider))
            .tool(upper_tool())
            .unwrap()
            .no_system_prompt()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let agent = agent_with(ScriptedProvider::echo("Hello!"));
        let id = SessionId::from("plain");

        let outcome = agent.send(&id, "Hi").await.unwrap();
        assert_eq!(outcome.final_text, "Hello!");
        assert_eq!(outcome.round_trips, 1);
        assert!(!outcome.truncated);
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[0], agent.store().load(&id).await.unwrap().messages()[0]);
    }

    #[tokio::test]
    async fn test_tool_results_follow_calls_in_order() {
        let agent = agent_with(two_call_provider());
        let id = SessionId::from("ordered");

        let outcome = agent.send(&id, "shout").await.unwrap();
        let roles: Vec<_> = outcome.trace.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(outcome.trace[2].tool_call_id.as_deref(), Some("first"));
        assert_eq!(outcome.trace[3].tool_call_id.as_deref(), Some("second"));
        assert_eq!(outcome.final_text, "got B+A");
        assert_eq!(outcome.round_trips, 2);

        let stored = agent.store().load(&id).await.unwrap();
        assert!(stored.unresolved_tool_calls().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_append_only_across_turns() {
        let agent = agent_with(two_call_provider());
        let id = SessionId::from("growing");

        agent.send(&id, "one").await.unwrap();
        let first = agent.store().load(&id).await.unwrap();
        agent.send(&id, "two").await.unwrap();
        let second = agent.store().load(&id).await.unwrap();

        assert!(second.len() > first.len());
        assert_eq!(&second.messages()[..first.len()], first.messages());
    }

    #[tokio::test]
    async fn test_round_trip_cap_truncates() {
        let provider = ScriptedProvider::new(|_, _| {
            Ok(Completion {
                tool_calls: vec![ToolCall::new("upper", json!({"text": "again"}))],
                ..Completion::text("", "scripted")
            })
        });
        let agent = AgentBuilder::new()
            .provider(Arc::new(provider))
            .tool(upper_tool())
            .unwrap()
            .max_round_trips(3)
            .build()
            .unwrap();

        let outcome = agent.send(&SessionId::from("loop"), "go").await.unwrap();
        assert!(outcome.truncated);
        assert_eq!(outcome.round_trips, 3);

        let last = outcome.trace.last().unwrap();
        assert!(last.is_truncated());
        assert!(last.content.contains("truncated"));

        let tool_messages = outcome.trace.iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(tool_messages, 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_turn_without_commit() {
        let provider = ScriptedProvider::new(|_, _| {
            Ok(Completion {
                tool_calls: vec![ToolCall::new("missing", json!({}))],
                ..Completion::text("", "scripted")
            })
        });
        let agent = agent_with(provider);
        let id = SessionId::from("broken");

        let err = agent.send(&id, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
        assert!(agent.store().load(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_tool_errors() {
        let provider = ScriptedProvider::new(|messages, _| {
            if last_role(messages) == Role::Tool {
                return Ok(Completion::text("recovered", "scripted"));
            }
            Ok(Completion {
                tool_calls: vec![ToolCall::new("upper", json!({"text": 42}))],
                ..Completion::text("", "scripted")
            })
        });
        let agent = AgentBuilder::new()
            .provider(Arc::new(provider))
            .tool(upper_tool())
            .unwrap()
            .recover_tool_errors(true)
            .build()
            .unwrap();

        let outcome = agent.send(&SessionId::from("lenient"), "hi").await.unwrap();
        assert_eq!(outcome.final_text, "recovered");
        assert!(outcome.trace.iter().any(Message::is_error));
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let agent = agent_with(ScriptedProvider::new(|_, _| {
            Err(AgentError::RateLimited("slow down".into()))
        }));
        let id = SessionId::from("limited");

        assert!(matches!(
            agent.send(&id, "hi").await,
            Err(AgentError::RateLimited(_))
        ));
        assert!(agent.store().load(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_system_prompt_added_once() {
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::echo("ok")))
            .system_prompt("Be brief.")
            .build()
            .unwrap();
        let id = SessionId::from("prompted");

        agent.send(&id, "one").await.unwrap();
        agent.send(&id, "two").await.unwrap();

        let state = agent.store().load(&id).await.unwrap();
        let systems = state.messages().iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
        assert_eq!(state.messages()[0].content, "Be brief.");
    }

    fn waiting_agent() -> Agent {
        let provider = ScriptedProvider::new(|messages, _| {
            if last_role(messages) == Role::Tool {
                return Ok(Completion::text("waited", "scripted"));
            }
            Ok(Completion {
                tool_calls: vec![ToolCall::new("wait", json!({}))],
                ..Completion::text("", "scripted")
            })
        });
        let wait = FnTool::new(ToolSchema::new("wait", "Sleeps briefly"), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("done".to_string())
        });
        AgentBuilder::new()
            .provider(Arc::new(provider))
            .tool(wait)
            .unwrap()
            .no_system_prompt()
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_commits_nothing() {
        let agent = waiting_agent();
        let id = SessionId::from("cancelled");
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = agent.send_cancellable(&id, "hi", &token).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(agent.store().load(&id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_to_one_session_serialize() {
        let agent = waiting_agent();
        let id = SessionId::from("shared");

        let (a, b) = tokio::join!(agent.send(&id, "first"), agent.send(&id, "second"));
        a.unwrap();
        b.unwrap();

        // user, assistant(call), tool, assistant for each turn
        let state = agent.store().load(&id).await.unwrap();
        assert_eq!(state.len(), 8);
        assert!(state.unresolved_tool_calls().is_empty());
    }

    #[tokio::test]
    async fn test_stream_events_match_outcome() {
        let agent = agent_with(two_call_provider());
        let id = SessionId::from("streamed");

        let events: Vec<_> = agent.send_stream(id.clone(), "shout").collect().await;

        let deltas: String = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::TextDelta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        let requested = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::ToolCallRequested { .. }))
            .count();
        let Some(TurnEvent::Completed { outcome }) = events.last() else {
            panic!("stream did not complete: {events:?}");
        };

        assert_eq!(requested, 2);
        assert_eq!(deltas, outcome.final_text);
        assert_eq!(
            agent.store().load(&id).await.unwrap().messages().last().unwrap().content,
            outcome.final_text
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_commits_nothing() {
        let agent = waiting_agent();
        let id = SessionId::from("abandoned");

        let mut stream = agent.send_stream(id.clone(), "hi");
        let first = stream.next().await;
        assert!(matches!(first, Some(TurnEvent::ToolCallRequested { .. })));
        drop(stream);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(agent.store().load(&id).await.unwrap().is_empty());
    }

    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        async fn info(&self) -> Result<ProviderInfo> {
            Err(AgentError::Other("unused".into()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<Completion> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Completion::text("too late", "stalled"))
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<CompletionStream> {
            Err(AgentError::Other("unused".into()))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_is_upstream_unavailable() {
        let agent = AgentBuilder::new()
            .provider(Arc::new(StalledProvider))
            .model_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        let err = agent.send(&SessionId::from("stalled"), "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_ask_is_stateless() {
        let agent = agent_with(ScriptedProvider::echo("42"));
        assert_eq!(agent.ask("meaning?").await.unwrap(), "42");
        assert!(agent.store().list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_on_caller_state() {
        let agent = agent_with(two_call_provider());
        let mut state = ConversationState::new(SessionId::from("manual"));

        let outcome = agent.run(&mut state, "shout").await.unwrap();
        assert_eq!(state.len(), outcome.trace.len());
        let names: Vec<_> = state.messages()[1]
            .tool_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["upper", "upper"]);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(
            AgentBuilder::new().build(),
            Err(AgentError::Config(_))
        ));
        assert!(AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::echo("x")))
            .max_round_trips(0)
            .build()
            .is_err());
    }
}
