//! Agent Loop
//!
//! Implements the ReAct (Reason + Act) cycle over native function calling.
//! Each user line becomes one turn: query the model, dispatch whatever tools
//! it asks for, feed the observations back, and stop when a reply carries no
//! tool calls or the round limit is hit.
//!
//! ```text
//! AwaitingUserInput ──line──▶ QueryingModel ──calls──▶ DispatchingTools
//!        ▲    │                    │  ▲                      │
//!        │    └─exit─▶ Terminated  │  └──────────────────────┘
//!        └────────── Done ◀─no calls┘
//! ```

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::{AgentError, Result};
use crate::message::Transcript;
use crate::provider::{GenerationOptions, LlmProvider};
use crate::session::TranscriptStore;
use crate::thought::ThoughtParser;
use crate::tool::{
    ToolBackend, ToolCallRequest, ToolCatalog, ToolInvoker, ToolResult, DEFAULT_MAX_ERROR_CHARS,
};

/// Tool rounds allowed per user turn
pub const DEFAULT_MAX_ROUNDS: usize = 25;

/// Observation recorded for calls abandoned by an interrupt
pub const CANCELLED_OBSERVATION: &str = "Error: tool call cancelled";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Base system prompt
    pub system_prompt: String,

    /// Maximum tool rounds per user turn before the turn is cut off
    pub max_rounds: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Whether to append the discovered tool list to the system prompt
    pub inject_tool_descriptions: bool,

    /// Check arguments against the declared schema before forwarding
    pub validate_arguments: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            generation: GenerationOptions::default(),
            inject_tool_descriptions: true,
            validate_arguments: false,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r"You are a specialized database administrator and programming agent.
You handle database operations, SQL, data analysis and general programming tasks.
If a user asks about other topics, politely decline.

# RULES FOR TOOL USAGE:
1. When you need a tool, use the tool_calls mechanism provided by the API.
2. Never write JSON in your text to simulate a tool call.
3. Never say you will call a tool without actually calling it.
4. Always output a [Thought] in your text before calling any tool. Text and
   tool calls may be returned in the same response.

# REASONING FORMAT:
[Thought]
Your reasoning (what you understand, what you plan to do).

Then:
- If you need data from tools: output the thought, then call the tool.
- If you already have enough information: give your answer after a blank line.";

/// Compose the system prompt from the base text and the catalog
pub fn build_system_prompt(config: &AgentConfig, catalog: &ToolCatalog) -> String {
    let mut prompt = config.system_prompt.clone();
    if config.inject_tool_descriptions && !catalog.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&catalog.prompt_section());
    }
    prompt
}

/// Where the loop currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUserInput,
    QueryingModel,
    DispatchingTools,
    Done,
    Terminated,
}

/// Operator input, classified
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserInput {
    Exit,
    Empty,
    Message(String),
}

impl UserInput {
    const EXIT_TOKENS: [&'static str; 3] = ["exit", "quit", "bye"];

    pub fn classify(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            Self::Empty
        } else if Self::EXIT_TOKENS
            .iter()
            .any(|t| trimmed.eq_ignore_ascii_case(t))
        {
            Self::Exit
        } else {
            Self::Message(trimmed.to_string())
        }
    }
}

/// Progress notifications for display
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    /// Reasoning segment of a model reply
    Thought(String),
    /// Visible answer segment of a model reply
    Answer(String),
    /// A tool call about to be dispatched
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// The observation appended for a call
    Observation {
        id: String,
        name: String,
        output: String,
        success: bool,
    },
    /// The turn was cut off after this many rounds
    RoundLimit { rounds: usize },
}

/// Why a turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStop {
    /// The model replied without tool calls
    Answered,
    /// The round limit was reached
    RoundLimit,
}

/// Result of one user turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Final visible answer (reasoning stripped)
    pub answer: Option<String>,
    /// Tool rounds dispatched during the turn
    pub rounds: usize,
    pub stop: TurnStop,
}

/// What happened to an input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line, nothing done
    Ignored,
    /// Exit token; the loop is terminated
    Exit,
    /// A full turn ran
    Answered(TurnOutcome),
}

/// The conversation driver. Owns the transcript and the tool connection.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    invoker: ToolInvoker,
    catalog: ToolCatalog,
    transcript: Transcript,
    config: AgentConfig,
    state: LoopState,
    events: Option<UnboundedSender<AgentEvent>>,
    store: Option<Box<dyn TranscriptStore>>,
}

impl AgentLoop {
    /// Create a loop over an already discovered catalog
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        invoker: ToolInvoker,
        catalog: ToolCatalog,
        config: AgentConfig,
    ) -> Self {
        let transcript = Transcript::new(build_system_prompt(&config, &catalog));
        Self {
            provider,
            invoker,
            catalog,
            transcript,
            config,
            state: LoopState::AwaitingUserInput,
            events: None,
            store: None,
        }
    }

    pub const fn state(&self) -> LoopState {
        self.state
    }

    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub const fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Whether the system turn still lists the tools discovered this session.
    ///
    /// False after resuming a transcript saved against a different tool set;
    /// the model then sees the new tool specs next to the old prompt.
    pub fn prompt_matches_catalog(&self) -> bool {
        self.transcript.system_prompt() == build_system_prompt(&self.config, &self.catalog)
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            // receiver gone means nobody is displaying; the turn goes on
            let _ = tx.send(event);
        }
    }

    /// Handle one operator line
    pub async fn handle_line(&mut self, line: &str) -> Result<LineOutcome> {
        if self.state == LoopState::Terminated {
            return Ok(LineOutcome::Exit);
        }
        match UserInput::classify(line) {
            UserInput::Empty => Ok(LineOutcome::Ignored),
            UserInput::Exit => {
                self.terminate();
                Ok(LineOutcome::Exit)
            }
            UserInput::Message(text) => self.run_turn(&text).await.map(LineOutcome::Answered),
        }
    }

    /// Run one user turn to completion.
    ///
    /// Model backend failures abandon the turn and are returned; the
    /// transcript keeps the user turn and any completed rounds. Tool failures
    /// never surface here.
    pub async fn run_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        if self.state == LoopState::Terminated {
            return Err(AgentError::Other("agent loop is terminated".into()));
        }
        if !self.transcript.is_settled() {
            self.abandon_turn();
        }

        let outcome = self.drive_turn(text).await;
        match &outcome {
            Ok(turn) => {
                tracing::info!(rounds = turn.rounds, stop = ?turn.stop, "turn finished");
            }
            Err(e) => {
                tracing::warn!(error = %e, model_backend = e.is_model_backend(), "turn abandoned");
            }
        }
        self.state = LoopState::AwaitingUserInput;
        outcome
    }

    async fn drive_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        self.transcript.push_user(text)?;
        let mut rounds = 0;

        loop {
            if rounds >= self.config.max_rounds {
                return self.stop_at_round_limit(rounds);
            }

            self.state = LoopState::QueryingModel;
            let tools = self.catalog.to_model_format();
            let reply = self
                .provider
                .complete(self.transcript.turns(), &tools, &self.config.generation)
                .await
                .map_err(|e| {
                    tracing::error!(provider = self.provider.name(), error = %e, "model query failed");
                    e
                })?;
            let parsed = reply
                .content
                .as_deref()
                .map(ThoughtParser::parse)
                .unwrap_or_default();

            self.transcript
                .push_assistant(reply.content.clone(), reply.tool_calls.clone())?;

            if let Some(reasoning) = &parsed.reasoning {
                self.emit(AgentEvent::Thought(reasoning.clone()));
            }
            if let Some(answer) = &parsed.answer {
                self.emit(AgentEvent::Answer(answer.clone()));
            }

            if !reply.has_tool_calls() {
                self.state = LoopState::Done;
                self.persist();
                return Ok(TurnOutcome {
                    answer: parsed.answer,
                    rounds,
                    stop: TurnStop::Answered,
                });
            }

            self.state = LoopState::DispatchingTools;
            rounds += 1;
            tracing::debug!(round = rounds, calls = reply.tool_calls.len(), "dispatching tools");

            for call in &reply.tool_calls {
                self.emit(AgentEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments_json(),
                });
                let result = self.dispatch(call).await;
                self.transcript.push_tool_result(&result)?;
                self.emit(AgentEvent::Observation {
                    id: result.id,
                    name: result.name,
                    output: result.output,
                    success: result.success,
                });
            }
        }
    }

    async fn dispatch(&mut self, call: &ToolCallRequest) -> ToolResult {
        tracing::info!(tool = %call.name, call_id = %call.id, "calling tool");
        if self.config.validate_arguments {
            if let Err(e) = self.catalog.validate_arguments(call) {
                tracing::warn!(tool = %call.name, call_id = %call.id, "{e}");
                return ToolResult::failure(call, &e, self.invoker.max_error_chars());
            }
        }
        self.invoker.execute(call).await
    }

    fn stop_at_round_limit(&mut self, rounds: usize) -> Result<TurnOutcome> {
        let answer = format!("Error: stopped after {rounds} tool rounds without a final answer.");
        tracing::warn!(rounds, "round limit reached, cutting the turn off");
        self.transcript.push_assistant(Some(answer.clone()), Vec::new())?;
        self.emit(AgentEvent::RoundLimit { rounds });
        self.emit(AgentEvent::Answer(answer.clone()));
        self.state = LoopState::Done;
        self.persist();
        Ok(TurnOutcome {
            answer: Some(answer),
            rounds,
            stop: TurnStop::RoundLimit,
        })
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.transcript) {
                tracing::warn!(error = %e, "failed to save transcript");
            }
        }
    }

    /// Recover after a turn future was dropped mid-flight.
    ///
    /// Calls left without a result are answered with a cancellation
    /// observation so the transcript stays sendable. Returns how many were
    /// settled.
    pub fn abandon_turn(&mut self) -> usize {
        let settled = self.transcript.settle_pending(CANCELLED_OBSERVATION);
        if settled > 0 {
            tracing::warn!(settled, "abandoned turn left pending tool calls");
        }
        if self.state != LoopState::Terminated {
            self.state = LoopState::AwaitingUserInput;
        }
        settled
    }

    /// Start over with only the system turn
    pub fn reset(&mut self) {
        self.transcript.reset();
        if self.state != LoopState::Terminated {
            self.state = LoopState::AwaitingUserInput;
        }
    }

    pub fn terminate(&mut self) {
        self.state = LoopState::Terminated;
    }

    /// End the session and close the tool connection
    pub async fn shutdown(mut self) -> Result<()> {
        self.abandon_turn();
        self.terminate();
        self.invoker.shutdown().await
    }
}

/// Builder that discovers tools and assembles an [`AgentLoop`]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    backend: Option<Box<dyn ToolBackend>>,
    config: AgentConfig,
    max_error_chars: usize,
    events: Option<UnboundedSender<AgentEvent>>,
    store: Option<Box<dyn TranscriptStore>>,
    transcript: Option<Transcript>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            backend: None,
            config: AgentConfig::default(),
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
            events: None,
            store: None,
            transcript: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool_backend<B: ToolBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.config.generation.temperature = temperature;
        self
    }

    pub fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub fn validate_arguments(mut self, enabled: bool) -> Self {
        self.config.validate_arguments = enabled;
        self
    }

    pub fn max_error_chars(mut self, max_chars: usize) -> Self {
        self.max_error_chars = max_chars;
        self
    }

    pub fn events(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn store<S: TranscriptStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Continue a previously saved conversation instead of starting fresh.
    ///
    /// The saved system turn is kept as is, even when the tools discovered
    /// at start differ from the ones it describes; `start` logs a warning in
    /// that case.
    pub fn resume(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Discover tools and build the loop. Discovery failure is fatal.
    pub async fn start(self) -> Result<AgentLoop> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let backend = self
            .backend
            .ok_or_else(|| AgentError::Config("Tool backend is required".into()))?;
        if self.config.max_rounds == 0 {
            return Err(AgentError::Config("max_rounds must be at least 1".into()));
        }

        let mut invoker = ToolInvoker::new(backend).with_max_error_chars(self.max_error_chars);
        let catalog = invoker.discover().await?;

        let mut agent = AgentLoop::new(provider, invoker, catalog, self.config);
        if let Some(mut transcript) = self.transcript {
            let settled = transcript.settle_pending(CANCELLED_OBSERVATION);
            if settled > 0 {
                tracing::warn!(settled, "resumed transcript had unanswered tool calls");
            }
            agent.transcript = transcript;
            if !agent.prompt_matches_catalog() {
                tracing::warn!(
                    tools = agent.catalog.len(),
                    "resumed system prompt differs from the current tool catalog"
                );
            }
        }
        agent.events = self.events;
        agent.store = self.store;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_input() {
        assert_eq!(UserInput::classify("   "), UserInput::Empty);
        assert_eq!(UserInput::classify(""), UserInput::Empty);
        assert_eq!(UserInput::classify(" EXIT "), UserInput::Exit);
        assert_eq!(UserInput::classify("Quit"), UserInput::Exit);
        assert_eq!(UserInput::classify("bye\n"), UserInput::Exit);
        assert_eq!(
            UserInput::classify("  bye bye tables  "),
            UserInput::Message("bye bye tables".into())
        );
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let catalog = ToolCatalog::from_descriptors(vec![crate::tool::ToolDescriptor {
            name: "run_sql".into(),
            description: "Execute a SQL query.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }])
        .unwrap();

        let prompt = build_system_prompt(&AgentConfig::default(), &catalog);
        assert!(prompt.starts_with("You are a specialized database administrator"));
        assert!(prompt.ends_with("1. run_sql(query) - Execute a SQL query.\n"));

        let bare = AgentConfig {
            inject_tool_descriptions: false,
            ..AgentConfig::default()
        };
        assert_eq!(build_system_prompt(&bare, &catalog), DEFAULT_SYSTEM_PROMPT);
    }
}
