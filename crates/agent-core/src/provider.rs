//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for model backends with function calling.
//! The agent loop only talks to [`LlmProvider`], so OpenAI, Ollama's
//! OpenAI-compatible endpoint or a scripted test double are interchangeable.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{GenerationOptions, LlmProvider};
//!
//! let reply = provider
//!     .complete(transcript.turns(), &catalog.to_model_format(), &GenerationOptions::default())
//!     .await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Turn;
use crate::tool::{ToolCallRequest, ToolSpec};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o", "llama3.2")
    pub model: String,

    /// Sampling temperature; `None` leaves the backend default
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate; `None` leaves the backend default
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Tool selection mode sent with every request
    #[serde(default = "default_tool_choice")]
    pub tool_choice: String,
}

fn default_tool_choice() -> String {
    "auto".into()
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: None,
            max_tokens: None,
            tool_choice: default_tool_choice(),
        }
    }
}

/// One assistant reply from the backend
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AssistantReply {
    /// Free text, possibly containing a `[Thought]` block
    pub content: Option<String>,

    /// Requested tool calls, in the order the model emitted them
    pub tool_calls: Vec<ToolCallRequest>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: Option<String>,
}

/// Strategy trait for model backends
///
/// Implement this trait to add support for new backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Check if the backend is reachable and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Query the model with the full transcript and the tool specs
    async fn complete(
        &self,
        turns: &[Turn],
        tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> Result<AssistantReply>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}
