//! Application State

use std::sync::Arc;

use agentloop_core::{Agent, AgentBuilder, JsonFileSessionStore, MemorySessionStore, SessionStore};
use agentloop_tools::default_registry;

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Agent holding the provider, tool registry and session store
    pub agent: Agent,

    /// Backend label reported by `/health` (e.g., "ollama")
    pub provider: String,
}

impl AppState {
    pub fn new(agent: Agent, provider: impl Into<String>) -> Self {
        Self {
            agent,
            provider: provider.into(),
        }
    }

    /// Wire provider, tools and store together from configuration
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let provider = config.provider.build()?;

        let mut tools = default_registry()?;
        if let Some(limit) = config.tool_timeout {
            tools = tools.with_timeout(limit);
        }

        let store: Arc<dyn SessionStore> = match &config.session_dir {
            Some(dir) => {
                let store = JsonFileSessionStore::open(dir.clone()).await?;
                tracing::info!("Sessions stored in {}", store.dir().display());
                Arc::new(store)
            }
            None => {
                tracing::info!("Sessions kept in memory (set SESSION_DIR to persist)");
                Arc::new(MemorySessionStore::new())
            }
        };

        let agent = AgentBuilder::new()
            .provider(provider)
            .tools(tools)
            .store(store)
            .system_prompt(config.system_prompt.clone())
            .model(config.provider.model.clone())
            .max_round_trips(config.max_round_trips)
            .build()?;

        Ok(Self::new(agent, config.provider.kind.to_string()))
    }
}
