//! Server Configuration

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context};

use agentloop_runtime::ProviderSettings;
use agentloop_tools::TOOLS_PROMPT;

/// Everything the binary reads from the environment
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (`BIND_ADDR`)
    pub bind_addr: String,

    /// Model calls allowed per turn (`MAX_ROUND_TRIPS`)
    pub max_round_trips: usize,

    /// Per-tool execution limit; `TOOL_TIMEOUT_SECS=0` disables it
    pub tool_timeout: Option<Duration>,

    /// Directory for the JSON file store; sessions stay in memory when unset
    pub session_dir: Option<PathBuf>,

    pub system_prompt: String,

    pub provider: ProviderSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            max_round_trips: 10,
            tool_timeout: Some(Duration::from_secs(30)),
            session_dir: None,
            system_prompt: TOOLS_PROMPT.into(),
            provider: ProviderSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_round_trips = parse_var(&get, "MAX_ROUND_TRIPS")?.unwrap_or(defaults.max_round_trips);
        if max_round_trips == 0 {
            bail!("MAX_ROUND_TRIPS must be at least 1");
        }

        let tool_timeout = match parse_var::<u64>(&get, "TOOL_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.tool_timeout,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_round_trips,
            tool_timeout,
            session_dir: get("SESSION_DIR").map(PathBuf::from),
            system_prompt: get("SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            provider: ProviderSettings::from_lookup(&get)?,
        })
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid {key}: '{value}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_runtime::ProviderKind;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key: &str| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.max_round_trips, 10);
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(30)));
        assert!(config.session_dir.is_none());
        assert_eq!(config.system_prompt, TOOLS_PROMPT);
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("MAX_ROUND_TRIPS", "4"),
            ("TOOL_TIMEOUT_SECS", "0"),
            ("SESSION_DIR", "/var/lib/agentloop"),
            ("SYSTEM_PROMPT", "Be brief."),
            ("LLM_PROVIDER", "scripted"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.max_round_trips, 4);
        assert_eq!(config.tool_timeout, None);
        assert_eq!(config.session_dir, Some(PathBuf::from("/var/lib/agentloop")));
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.provider.kind, ProviderKind::Scripted);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("MAX_ROUND_TRIPS", "0")]).is_err());
        assert!(config(&[("MAX_ROUND_TRIPS", "many")]).is_err());
        assert!(config(&[("TOOL_TIMEOUT_SECS", "-1")]).is_err());
        assert!(config(&[("LLM_PROVIDER", "skynet")]).is_err());
    }
}
