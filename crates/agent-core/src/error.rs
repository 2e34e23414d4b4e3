//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// The tool service could not enumerate its tools
    #[error("Tool discovery failed: {0}")]
    Discovery(String),

    /// Model backend returned an error
    #[error("Model backend error: {0}")]
    ModelBackend(String),

    /// Model backend unreachable or not responding
    #[error("Model backend unavailable: {0}")]
    ProviderUnavailable(String),

    /// Model backend rate limited the request
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Model backend rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Tool invocation failed or the service reported an application error
    #[error("{0}")]
    ToolExecution(String),

    /// Tool arguments did not decode or did not match the declared schema
    #[error("invalid arguments for '{tool}': {reason}")]
    MalformedToolArguments { tool: String, reason: String },

    /// A transcript mutation would break the turn ordering rules
    #[error("Transcript error: {0}")]
    Transcript(String),

    /// Transcript persistence error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Whether the error came from the model backend.
    ///
    /// These abandon the current user turn but leave the session running.
    pub const fn is_model_backend(&self) -> bool {
        matches!(
            self,
            Self::ModelBackend(_)
                | Self::ProviderUnavailable(_)
                | Self::RateLimited(_)
                | Self::Auth(_)
        )
    }

    /// Whether the error must stop the session.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Discovery(_) | Self::Config(_))
    }

    /// Text used for a tool observation when this error is absorbed into
    /// the transcript. Never carries a leading `Error:` prefix.
    pub fn observation_cause(&self) -> String {
        let text = self.to_string();
        text.strip_prefix("Error:")
            .map_or_else(|| text.clone(), |rest| rest.trim_start().to_string())
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Discovery(msg) => format!("Could not load tools from the tool server: {msg}"),
            Self::ModelBackend(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your API key.".into(),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::MalformedToolArguments { tool, reason } => {
                format!("Invalid arguments for tool '{tool}': {reason}")
            }
            Self::Config(msg) => format!("Configuration problem: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
