//! MCP stdio tool backend.
//!
//! Talks JSON-RPC 2.0 to a tool server running as a child process, one JSON
//! object per line on stdin/stdout.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{McpClient, McpServerConfig};
pub use transport::StdioTransport;

use agent_core::AgentError;
use thiserror::Error;

/// Errors that can occur while talking to the tool server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process failed to start.
    #[error("failed to spawn tool server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("tool server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O or framing failure on the pipes.
    #[error("transport error for tool server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server answered with a JSON-RPC error object.
    #[error("server error [{code}]: {message}")]
    ServerError { code: i32, message: String },

    /// A result that does not have the expected shape.
    #[error("unexpected response to '{method}': {reason}")]
    InvalidResponse { method: String, reason: String },

    /// The tool ran and reported failure (`isError`).
    #[error("{message}")]
    ToolFailed { tool: String, message: String },

    /// A request got no answer in time.
    #[error("'{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The connection was already shut down.
    #[error("tool server '{name}' is closed")]
    Closed { name: String },
}

impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::ToolFailed { tool, message } => {
                tracing::warn!(tool = %tool, "tool reported an error");
                Self::ToolExecution(message)
            }
            McpError::SpawnFailed { .. } | McpError::InitFailed { .. } => {
                Self::Discovery(err.to_string())
            }
            other => Self::ToolExecution(other.to_string()),
        }
    }
}
