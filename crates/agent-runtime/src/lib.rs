//! # agent-runtime
//!
//! Concrete backends for the agent loop.
//!
//! ## Backends
//!
//! - **OpenAI** (`openai`): Chat Completions with native function calling.
//!   Also works against Ollama's OpenAI-compatible `/v1` endpoint.
//! - **MCP** (`mcp`): tool server spawned as a child process, spoken to over
//!   line-delimited JSON-RPC on stdio.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{McpClient, McpServerConfig, OpenAiProvider};
//!
//! let tools = McpClient::spawn(&McpServerConfig::new("python").args(["server.py"])).await?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(OpenAiProvider::from_env()?))
//!     .tool_backend(tools)
//!     .start()
//!     .await?;
//! ```

pub mod mcp;
pub mod openai;

pub use mcp::{McpClient, McpError, McpServerConfig};
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Result, ToolBackend};
