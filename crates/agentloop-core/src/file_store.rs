//! JSON file session store
//!
//! One pretty-printed JSON document per session under a directory. Writes go
//! to a temporary file in the same directory and are renamed into place, so
//! readers only ever see a complete previous or complete new state.
//!
//! Ids made of ASCII letters, digits, `-` and `_` (up to 128 characters) are
//! stored as `<id>.json`. Any other id is stored as `~<sha256 of id>.json`;
//! `~` never appears in a plain name, so the two forms cannot collide.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{AgentError, Result};
use crate::session::{ConversationState, SessionGuard, SessionId, SessionLocks, SessionStore, SessionSummary};

const EXTENSION: &str = "json";

/// Durable session store backed by the filesystem
pub struct JsonFileSessionStore {
    dir: PathBuf,
    locks: SessionLocks,
}

impl JsonFileSessionStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "Opened session directory");
        Ok(Self {
            dir,
            locks: SessionLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_stem(id: &SessionId) -> String {
        let raw = id.as_str();
        let plain = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if plain {
            raw.to_string()
        } else {
            format!("~{}", hex::encode(Sha256::digest(raw.as_bytes())))
        }
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", Self::file_stem(id)))
    }

    async fn read_state(path: &Path) -> Result<Option<ConversationState>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self, id: &SessionId) -> Result<ConversationState> {
        let path = self.path_for(id);
        match Self::read_state(&path).await? {
            Some(state) if state.session_id != *id => Err(AgentError::Session(format!(
                "{} holds session {}, not {id}",
                path.display(),
                state.session_id
            ))),
            Some(state) => Ok(state),
            None => Ok(ConversationState::new(id.clone())),
        }
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let path = self.path_for(&state.session_id);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            Self::file_stem(&state.session_id),
            uuid::Uuid::new_v4().simple()
        ));

        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AgentError::Session(format!(
                "failed to persist session {}: {e}",
                state.session_id
            )));
        }
        tracing::debug!(session = %state.session_id, messages = state.len(), "Saved session");
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut result = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_session = path.extension().is_some_and(|ext| ext == EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_session {
                continue;
            }
            match Self::read_state(&path).await {
                Ok(Some(state)) => result.push(state.summary()),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session"),
            }
        }

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
    use crate::message::Message;
    use crate::tool::{ToolCall, ToolResult};
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();

        let mut state = ConversationState::new(SessionId::from("triangle-1"));
        let call = ToolCall::new("hypotenuse", json!({"sides": "3, 4"}));
        state.push(Message::user("Sides are 3, 4"));
        state.push(Message::assistant_with_tool_calls("", vec![call.clone()]));
        state.push(Message::tool(&ToolResult::success(&call.id, "hypotenuse", "5.0")));
        state.push(Message::assistant("The hypotenuse is 5.0"));
        store.save(&state).await.unwrap();

        // A fresh handle sees the same data.
        let reopened = JsonFileSessionStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load(&state.session_id).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_unknown_and_unusual_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();

        let fresh = store.load(&SessionId::from("nobody")).await.unwrap();
        assert!(fresh.is_empty());

        let traversal = store.load(&SessionId::from("../etc/passwd")).await.unwrap();
        assert!(traversal.is_empty());
        assert_eq!(traversal.session_id.as_str(), "../etc/passwd");

        for raw in ["alice@example.com", "../escape", "", "a/b\\c", "日本"] {
            let mut state = ConversationState::new(SessionId::from(raw));
            state.push(Message::user(format!("hello from {raw}")));
            store.save(&state).await.unwrap();
            assert_eq!(store.load(&state.session_id).await.unwrap(), state);
        }

        // Every file stays directly inside the store directory.
        assert!(!dir.path().join("../escape.json").exists());
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(entry.file_type().await.unwrap().is_file());
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.starts_with('~') && n.ends_with(".json")));

        let listed = store.list(10).await.unwrap();
        assert!(listed.iter().any(|s| s.session_id.as_str() == "alice@example.com"));
        assert!(store.delete(&SessionId::from("alice@example.com")).await.unwrap());
    }

    #[tokio::test]
    async fn test_floats_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();

        let mut state = ConversationState::new(SessionId::from("floats"));
        let call = ToolCall::new(
            "calculate",
            json!({"x": 1.859_794_120_780_816_3e-7, "y": 0.1, "z": f64::MAX}),
        );
        state.push(Message::assistant_with_tool_calls("", vec![call]));
        store.save(&state).await.unwrap();

        let loaded = store.load(&state.session_id).await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(
            loaded.messages()[0].tool_calls[0].arguments["x"].as_f64(),
            Some(1.859_794_120_780_816_3e-7)
        );
    }

    #[tokio::test]
    async fn test_overwrite_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();

        let mut state = ConversationState::new(SessionId::from("s"));
        state.push(Message::user("one"));
        store.save(&state).await.unwrap();
        state.push(Message::assistant("two"));
        store.save(&state).await.unwrap();

        assert_eq!(store.load(&state.session_id).await.unwrap().len(), 2);

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_count, 2);

        assert!(store.delete(&state.session_id).await.unwrap());
        assert!(store.list(10).await.unwrap().is_empty());
    }
}
