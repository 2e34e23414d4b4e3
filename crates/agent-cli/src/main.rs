//! Database agent console
//!
//! Spawns the MCP tool server, discovers its tools and runs the ReAct loop
//! against an OpenAI-compatible model, one operator line at a time.

mod config;
mod console;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{AgentBuilder, JsonFileStore, LlmProvider, TranscriptStore};
use agent_runtime::{McpClient, OpenAiProvider};

use crate::config::{Cli, DEFAULT_LOG_FILTER};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before clap reads it
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Model backend
    let openai = cli.openai_config();
    let provider = Arc::new(OpenAiProvider::from_config(openai.clone())?);
    match provider.health_check().await {
        Ok(true) => tracing::info!(base_url = %openai.base_url, "model backend reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!(base_url = %openai.base_url, "model backend not reachable, requests may fail");
        }
    }

    // Tool server
    let server = cli.server_config();
    let tools = McpClient::spawn(&server)
        .await
        .with_context(|| format!("could not start tool server '{}'", server.command))?;

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut builder = AgentBuilder::new()
        .provider(provider)
        .tool_backend(tools)
        .model(&cli.model)
        .max_rounds(cli.max_rounds)
        .validate_arguments(cli.validate_arguments)
        .temperature(cli.temperature)
        .events(events_tx);

    if let Some(path) = &cli.system_prompt_file {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("could not read system prompt from {}", path.display()))?;
        builder = builder.system_prompt(prompt.trim_end());
    }

    if let Some(path) = cli.transcript_path() {
        let store = JsonFileStore::new(path);
        if cli.resume {
            match store.load()? {
                Some(transcript) => {
                    tracing::info!(path = %path.display(), turns = transcript.len(), "resuming conversation");
                    builder = builder.resume(transcript);
                }
                None => tracing::warn!(path = %path.display(), "nothing to resume, starting fresh"),
            }
        }
        builder = builder.store(store);
    }

    let mut agent = builder.start().await.context("agent startup failed")?;

    console::print_banner(&cli.model, &openai.base_url, openai.api_key.as_deref(), &agent);
    let session = console::run(&mut agent, events_rx).await;

    agent.shutdown().await?;
    session
}
