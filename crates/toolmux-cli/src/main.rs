//! Terminal chat with a local model that can call MCP tool servers.
//!
//! Run with: cargo run -p toolmux-cli -- --model llama3.1:8b
//!
//! Tool servers come from `<config dir>/toolmux/config.toml` (or `--config`);
//! without a config file the Azure and filesystem MCP servers are started
//! through `npx`.

mod cli;
mod config;
mod repl;

use std::io::{self, Write};

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use toolmux_agent::{OllamaBackend, ToolLoop};
use toolmux_session::{
    CatalogAggregator, HistoryManager, JsonFileStore, MemoryStore, SessionRegistry,
};
use toolmux_stdio::StdioConnector;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{cli::Cli, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(&cli);

    let mut registry = SessionRegistry::new();
    let result = tokio::select! {
        biased;
        result = async {
            registry.open_all(&StdioConnector, &config.servers).await;
            chat(&config, &registry).await
        } => result,
        () = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
            Ok(())
        }
    };
    registry.close().await;
    result
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}

async fn chat(config: &Config, registry: &SessionRegistry) -> anyhow::Result<()> {
    let mut out = io::stdout();
    repl::print_open_failures(registry, &mut out)?;

    match CatalogAggregator::new(registry).collect(None).await {
        Ok(catalog) => repl::print_tool_index(&catalog, &mut out)?,
        Err(e) => writeln!(out, "Could not fetch tools list: {e}")?,
    }

    let backend = OllamaBackend::new(config.ollama()).context("Failed to set up model backend")?;
    tracing::info!(model = backend.model(), url = %config.model.url, "Using Ollama");
    let agent = ToolLoop::new(backend, registry).with_max_rounds(config.agent.max_rounds);

    let history = if config.history.enabled {
        HistoryManager::new(
            JsonFileStore::new(&config.history.path),
            config.history.max_entries,
        )
    } else {
        HistoryManager::new(MemoryStore::new(), config.history.max_entries)
    };
    let prompt = config.system_prompt(&registry.identities());
    let mut conversation = history.load_conversation(&prompt).await;

    let stdin = BufReader::new(tokio::io::stdin());
    repl::run(&agent, &history, &mut conversation, stdin, &mut out).await?;
    Ok(())
}
