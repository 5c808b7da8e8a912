//! TOML configuration with built-in defaults and CLI overrides.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use toolmux_agent::{DEFAULT_MAX_ROUNDS, OllamaConfig, default_system_prompt};
use toolmux_core::ServerSpec;

use crate::cli::Cli;

const CONFIG_DIR: &str = "toolmux";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub history: HistoryConfig,
    pub agent: AgentConfig,
    /// Tool servers, opened in this order.
    pub servers: Vec<ServerSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub url: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_rounds: usize,
    /// Replaces the generated system prompt.
    pub system_prompt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            history: HistoryConfig::default(),
            agent: AgentConfig::default(),
            servers: default_servers(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let ollama = OllamaConfig::default();
        Self {
            name: ollama.model,
            url: ollama.url,
            temperature: ollama.temperature,
            max_tokens: ollama.max_tokens,
            timeout_secs: ollama.timeout.as_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".mcp_ollama_history.json"),
            max_entries: 30,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_prompt: None,
        }
    }
}

fn default_servers() -> Vec<ServerSpec> {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    vec![
        ServerSpec::new("azure", "npx", ["-y", "@azure/mcp@latest", "server", "start"]),
        ServerSpec::new(
            "filesystem",
            "npx",
            ["-y".to_string(), "@modelcontextprotocol/server-filesystem".to_string(), cwd],
        ),
    ]
}

/// `<config dir>/toolmux/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl Config {
    /// Load `explicit`, or the default file if it exists, or the defaults.
    ///
    /// # Errors
    /// Returns error if an explicit file is missing, or any file read fails
    /// to parse.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::info!(path = %path.display(), servers = config.servers.len(), "Loaded config");
        Ok(config)
    }

    /// # Errors
    /// Returns error if `text` is not a valid config document.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(model) = &cli.model {
            self.model.name.clone_from(model);
        }
        if let Some(url) = &cli.url {
            self.model.url.clone_from(url);
        }
        if let Some(path) = &cli.history {
            self.history.path.clone_from(path);
        }
        if let Some(max) = cli.max_history {
            self.history.max_entries = max;
        }
        if let Some(max) = cli.max_rounds {
            self.agent.max_rounds = max;
        }
        if cli.no_history {
            self.history.enabled = false;
        }
    }

    #[must_use]
    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            url: self.model.url.clone(),
            model: self.model.name.clone(),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            timeout: Duration::from_secs(self.model.timeout_secs),
        }
    }

    /// Configured prompt, or one generated for `identities`.
    #[must_use]
    pub fn system_prompt(&self, identities: &[&str]) -> String {
        self.agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(identities))
    }
}
