//! Session Management
//!
//! Conversation state keyed by session id, and the stores that checkpoint it
//! between turns.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};
use crate::tool::ToolCall;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered, append-only message log of one session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Owning session
    pub session_id: SessionId,

    messages: Vec<Message>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create an empty state
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Tool calls that have no tool message answering them yet
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCall> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .filter(|call| !answered.contains(call.id.as_str()))
            .collect()
    }

    /// Title derived from the first user message
    pub fn title(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map_or_else(
                || format!("Session {}", self.session_id),
                |m| {
                    let preview: String = m.content.chars().take(50).collect();
                    if m.content.chars().count() > 50 {
                        format!("{preview}...")
                    } else {
                        preview
                    }
                },
            )
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            title: self.title(),
            message_count: self.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing entry for a stored session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Held for the duration of a turn; releases the session on drop
pub type SessionGuard = OwnedMutexGuard<()>;

/// Per-session async mutexes; unrelated sessions never contend
#[derive(Default)]
pub struct SessionLocks {
    locks: std::sync::Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &SessionId) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on can go.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Session store trait for persistence (checkpointing)
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; unknown ids yield a fresh empty state
    async fn load(&self, id: &SessionId) -> Result<ConversationState>;

    /// Atomically overwrite a session
    async fn save(&self, state: &ConversationState) -> Result<()>;

    /// Delete a session, reporting whether it existed
    async fn delete(&self, id: &SessionId) -> Result<bool>;

    /// Most recently updated sessions first
    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    /// Exclusive access to one session for a read-modify-write cycle
    async fn lock(&self, id: &SessionId) -> SessionGuard;
}

/// In-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, ConversationState>>,
    locks: SessionLocks,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> AgentError {
    AgentError::Session("session map lock poisoned".into())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<ConversationState> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .get(id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(id.clone())))
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(id).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut result: Vec<_> = sessions.values().map(ConversationState::summary).collect();

        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);

        Ok(result)
    }

    async fn lock(&self, id: &SessionId) -> SessionGuard {
        self.locks.acquire(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolResult;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_load_unknown_is_empty() {
        let store = MemorySessionStore::new();
        let id = SessionId::from("never-seen");

        for _ in 0..2 {
            let state = store.load(&id).await.unwrap();
            assert_eq!(state.session_id, id);
            assert!(state.is_empty());
        }
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = MemorySessionStore::new();
        let mut state = ConversationState::new(SessionId::from("s1"));
        let call = ToolCall::new("palindrome", json!({"text": "level"}));
        state.push(Message::user("Is level a palindrome?"));
        state.push(Message::assistant_with_tool_calls("", vec![call.clone()]));
        state.push(Message::tool(&ToolResult::success(&call.id, "palindrome", "true")));

        store.save(&state).await.unwrap();
        assert_eq!(store.load(&state.session_id).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = MemorySessionStore::new();
        let mut first = ConversationState::new(SessionId::from("a"));
        first.push(Message::user("first"));
        store.save(&first).await.unwrap();

        let mut second = ConversationState::new(SessionId::from("b"));
        second.push(Message::user("second"));
        store.save(&second).await.unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, second.session_id);
        assert_eq!(listed[0].title, "second");

        assert!(store.delete(&first.session_id).await.unwrap());
        assert!(!store.delete(&first.session_id).await.unwrap());
        assert_eq!(store.list(10).await.unwrap().len(), 1);
    }

    #[test]
    fn test_unresolved_tool_calls() {
        let mut state = ConversationState::new(SessionId::new());
        let a = ToolCall::new("t", json!({})).with_id("a");
        let b = ToolCall::new("t", json!({})).with_id("b");
        state.push(Message::assistant_with_tool_calls("", vec![a, b.clone()]));
        state.push(Message::tool(&ToolResult::success("a", "t", "ok")));

        assert_eq!(state.unresolved_tool_calls(), vec![&b]);
    }

    #[tokio::test]
    async fn test_lock_is_per_session() {
        let store = Arc::new(MemorySessionStore::new());
        let held = store.lock(&SessionId::from("busy")).await;

        // A different session is not blocked.
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            store.lock(&SessionId::from("free")),
        )
        .await;
        assert!(other.is_ok());

        // The same session waits until the guard is dropped.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store.lock(&SessionId::from("busy")),
        )
        .await;
        assert!(blocked.is_err());

        drop(held);
        let reacquired = tokio::time::timeout(
            Duration::from_millis(100),
            store.lock(&SessionId::from("busy")),
        )
        .await;
        assert!(reacquired.is_ok());
    }

    #[test]
    fn test_title_truncates() {
        let mut state = ConversationState::new(SessionId::from("t"));
        assert_eq!(state.title(), "Session t");
        state.push(Message::user("x".repeat(60)));
        assert_eq!(state.title(), format!("{}...", "x".repeat(50)));
    }
}
