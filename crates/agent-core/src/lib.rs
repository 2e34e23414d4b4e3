//! # agent-core
//!
//! Control loop for a tool-calling conversational agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           AgentLoop                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐  ┌────────┐  │
//! │  │ Transcript  │  │ ToolCatalog  │  │ ToolInvoker │  │ Thought│  │
//! │  │  (turns)    │  │ (discovered) │──│ ToolBackend │  │ Parser │  │
//! │  └─────────────┘  └──────────────┘  └─────────────┘  └────────┘  │
//! │                          │                                       │
//! │                   ┌──────────────┐                               │
//! │                   │ LlmProvider  │                               │
//! │                   │  (Strategy)  │                               │
//! │                   └──────────────┘                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` and `ToolBackend` traits are the two seams to the
//! outside world; `agent-runtime` supplies the OpenAI-compatible and MCP
//! implementations.

pub mod agent_loop;
pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod thought;
pub mod tool;

pub use agent_loop::{
    AgentBuilder, AgentConfig, AgentEvent, AgentLoop, LineOutcome, LoopState, TurnOutcome,
    TurnStop, UserInput,
};
pub use error::{AgentError, Result};
pub use message::{Role, Transcript, Turn};
pub use provider::{AssistantReply, GenerationOptions, LlmProvider};
pub use session::{JsonFileStore, MemoryTranscriptStore, TranscriptStore};
pub use thought::{ParsedReply, ThoughtParser};
pub use tool::{
    Arguments, ToolBackend, ToolCallRequest, ToolCatalog, ToolDescriptor, ToolInvoker, ToolResult,
    ToolSpec,
};
