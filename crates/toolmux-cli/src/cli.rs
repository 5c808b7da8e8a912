//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Chat with a local model that can call MCP tool servers.
#[derive(Debug, Parser)]
#[command(name = "toolmux", version, about)]
pub struct Cli {
    /// Configuration file (default: <config dir>/toolmux/config.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Model name, e.g. `llama3.1:8b`.
    #[arg(long)]
    pub model: Option<String>,

    /// Base URL of the Ollama server.
    #[arg(long)]
    pub url: Option<String>,

    /// Conversation history file.
    #[arg(long, value_name = "PATH")]
    pub history: Option<PathBuf>,

    /// Non-system messages kept between turns.
    #[arg(long, value_name = "N")]
    pub max_history: Option<usize>,

    /// Tool-call rounds allowed per turn.
    #[arg(long, value_name = "N")]
    pub max_rounds: Option<usize>,

    /// Keep history in memory only.
    #[arg(long)]
    pub no_history: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
