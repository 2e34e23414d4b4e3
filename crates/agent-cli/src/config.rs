//! Command line and environment configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_core::agent_loop::DEFAULT_MAX_ROUNDS;
use agent_runtime::{McpServerConfig, OpenAiConfig};
use clap::Parser;

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "warn,agent_core=info";

/// Database agent console
#[derive(Debug, Parser)]
#[command(name = "agent-cli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command that launches the MCP tool server
    #[arg(long, env = "AGENT_TOOL_SERVER_COMMAND")]
    pub server_command: String,

    /// Argument for the tool server command (repeatable)
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Model identifier
    #[arg(long, env = "AGENT_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Chat Completions base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub base_url: String,

    /// API key sent as a bearer token
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Tool rounds allowed per user turn
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_rounds: usize,

    /// Where the transcript is saved after each answered turn
    #[arg(long, env = "AGENT_TRANSCRIPT", default_value = "messages.json")]
    pub transcript: PathBuf,

    /// Do not save the transcript
    #[arg(long)]
    pub no_transcript: bool,

    /// Continue the conversation saved at --transcript
    #[arg(long, conflicts_with = "no_transcript")]
    pub resume: bool,

    /// File whose contents replace the built-in system prompt
    #[arg(long)]
    pub system_prompt_file: Option<PathBuf>,

    /// Check tool arguments against the advertised schema before calling
    #[arg(long)]
    pub validate_arguments: bool,

    /// Seconds to wait for one tool call
    #[arg(long, default_value_t = 30)]
    pub tool_timeout_secs: u64,

    /// Seconds to wait for one model response
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,
}

impl Cli {
    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn server_config(&self) -> McpServerConfig {
        McpServerConfig::new(&self.server_command)
            .args(self.server_args.iter().cloned())
            .call_timeout(Duration::from_secs(self.tool_timeout_secs))
    }

    /// Transcript location, unless saving is disabled
    pub fn transcript_path(&self) -> Option<&Path> {
        (!self.no_transcript).then_some(self.transcript.as_path())
    }
}
