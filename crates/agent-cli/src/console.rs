//! Interactive console: renders agent events and reads operator input.

use agent_core::{AgentError, AgentEvent, AgentLoop, LineOutcome, tool::truncate_text};
use anyhow::{Context, Result, anyhow};
use console::{Style, style};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

/// Observations longer than this are cut on screen; the transcript keeps all
const OBSERVATION_DISPLAY_CHARS: usize = 300;

/// Slash command that clears the conversation
const RESET_COMMAND: &str = "/reset";

/// Plain-text form of an event, one block per event
pub fn render_event(event: &AgentEvent) -> String {
    match event {
        AgentEvent::Thought(text) => format!("[Thought]\n{text}"),
        AgentEvent::Answer(text) => format!("Assistant: {text}"),
        AgentEvent::ToolCall {
            name, arguments, ..
        } => format!("[Action] {name}({arguments})"),
        AgentEvent::Observation { output, .. } => format!(
            "[Observation] {}",
            truncate_text(output, OBSERVATION_DISPLAY_CHARS, "...")
        ),
        AgentEvent::RoundLimit { rounds } => format!("(stopped after {rounds} tool rounds)"),
    }
}

fn event_style(event: &AgentEvent) -> Style {
    match event {
        AgentEvent::Thought(_) => Style::new().yellow(),
        AgentEvent::Answer(_) => Style::new().cyan(),
        AgentEvent::ToolCall { .. } => Style::new().magenta(),
        AgentEvent::Observation { success: true, .. } => Style::new().green(),
        AgentEvent::Observation { success: false, .. } => Style::new().red(),
        AgentEvent::RoundLimit { .. } => Style::new().dim(),
    }
}

fn print_event(event: &AgentEvent) {
    let spacer = match event {
        AgentEvent::Observation { .. } => "",
        _ => "\n",
    };
    println!("{spacer}{}", event_style(event).apply_to(render_event(event)));
}

fn print_dim(text: &str) {
    println!("{}", style(text).dim());
}

fn print_error(err: &AgentError) {
    println!("\n{}", style(err.user_message()).red());
    print_dim(&format!("({err})"));
    if let Some(hint) = retry_hint(err) {
        print_dim(hint);
    }
}

/// Suggestion shown after a failure that may go away on its own
pub fn retry_hint(err: &AgentError) -> Option<&'static str> {
    err.is_retryable()
        .then_some("This looks temporary. Send your message again to retry.")
}

/// First characters of a key, enough to tell keys apart
pub fn mask_key(key: Option<&str>) -> String {
    match key {
        Some(key) if !key.is_empty() => {
            let prefix: String = key.chars().take(8).collect();
            format!("{prefix}...")
        }
        _ => "Not Set".into(),
    }
}

/// Startup banner
pub fn print_banner(model: &str, base_url: &str, api_key: Option<&str>, agent: &AgentLoop) {
    let header = Style::new().magenta().bold();
    println!("{}", header.apply_to("--- Agent Startup ---"));
    println!("Model:    {model}");
    println!("Base URL: {base_url}");
    println!("API Key:  {}", mask_key(api_key));

    let names = agent.catalog().names();
    println!("Found {} tools: {}", names.len(), names.join(", "));

    println!("\n{}", "=".repeat(50));
    println!("{}", style("Database agent online").cyan());
    println!("Type 'exit', 'quit', or 'bye' to stop, '{RESET_COMMAND}' to start over.");
    println!("{}\n", "=".repeat(50));
}

/// What the line editor produced
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl+C at the prompt
    Interrupted,
    /// Ctrl+D or closed stdin
    Eof,
}

fn input_from(result: std::result::Result<String, ReadlineError>) -> Result<Input> {
    match result {
        Ok(line) => Ok(Input::Line(line)),
        Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
        Err(ReadlineError::Eof) => Ok(Input::Eof),
        Err(e) => Err(anyhow!("input error: {e}")),
    }
}

type ReadRequest = (String, oneshot::Sender<Result<Input>>);

/// Line editor running on its own thread.
///
/// A read blocked on the terminal never holds up runtime shutdown; the
/// thread ends once the reader is dropped.
pub struct LineReader {
    requests: std::sync::mpsc::Sender<ReadRequest>,
}

impl LineReader {
    pub fn spawn() -> Result<Self> {
        let (requests, pending) = std::sync::mpsc::channel::<ReadRequest>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        std::thread::Builder::new()
            .name("line-editor".into())
            .spawn(move || {
                let config = Config::builder()
                    .history_ignore_space(true)
                    .auto_add_history(true)
                    .build();
                let mut editor = match Editor::<(), DefaultHistory>::with_config(config) {
                    Ok(editor) => {
                        let _ = ready_tx.send(Ok(()));
                        editor
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(anyhow!("could not open line editor: {e}")));
                        return;
                    }
                };
                while let Ok((prompt, reply)) = pending.recv() {
                    if reply.send(input_from(editor.readline(&prompt))).is_err() {
                        break;
                    }
                }
            })
            .context("could not start line editor thread")?;

        ready_rx.recv().context("line editor thread exited")??;
        Ok(Self { requests })
    }

    /// Show the prompt and wait for one line
    pub async fn read(&self, prompt: &str) -> Result<Input> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send((prompt.to_string(), reply))
            .map_err(|_| anyhow!("line editor is gone"))?;
        answer.await.context("line editor is gone")?
    }
}

fn format_prompt() -> String {
    format!("{} ", style("User:").green())
}

/// Run one line through the agent while streaming its events.
///
/// Returns `None` when the operator interrupted the turn.
async fn run_line(
    agent: &mut AgentLoop,
    line: &str,
    events: &mut UnboundedReceiver<AgentEvent>,
) -> Option<agent_core::Result<LineOutcome>> {
    let outcome = {
        let turn = agent.handle_line(line);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                outcome = &mut turn => break Some(outcome),
                Some(event) = events.recv() => print_event(&event),
                _ = tokio::signal::ctrl_c() => break None,
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    outcome
}

/// Read-eval-print loop until exit, EOF or Ctrl+C at the prompt
pub async fn run(agent: &mut AgentLoop, mut events: UnboundedReceiver<AgentEvent>) -> Result<()> {
    let reader = LineReader::spawn()?;

    loop {
        println!();
        // Piped stdin gets SIGINT instead of a keystroke, so race it too
        let prompt = format_prompt();
        let input = tokio::select! {
            input = reader.read(&prompt) => input?,
            _ = tokio::signal::ctrl_c() => Input::Interrupted,
        };
        let line = match input {
            Input::Line(line) => line,
            Input::Interrupted | Input::Eof => {
                println!();
                break;
            }
        };

        if line.trim() == RESET_COMMAND {
            agent.reset();
            print_dim("Conversation reset.");
            continue;
        }

        match run_line(agent, &line, &mut events).await {
            Some(Ok(LineOutcome::Exit)) => break,
            Some(Ok(_)) => {}
            Some(Err(e)) if e.is_fatal() => return Err(e.into()),
            Some(Err(e)) => print_error(&e),
            None => {
                let settled = agent.abandon_turn();
                tracing::info!(settled, "turn interrupted by operator");
                print_dim("\n(Interrupted - type 'exit' to quit)");
            }
        }
    }

    print_dim("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_render_events() {
        assert_eq!(
            render_event(&AgentEvent::Thought("list db1 first".into())),
            "[Thought]\nlist db1 first"
        );
        assert_eq!(
            render_event(&AgentEvent::ToolCall {
                id: "call_1".into(),
                name: "list_tables".into(),
                arguments: r#"{"database_path":"db1"}"#.into(),
            }),
            r#"[Action] list_tables({"database_path":"db1"})"#
        );
        assert_eq!(
            render_event(&AgentEvent::Answer("Only in db1: orders".into())),
            "Assistant: Only in db1: orders"
        );
    }

    #[test]
    fn test_long_observation_is_cut_on_screen() {
        let rendered = render_event(&AgentEvent::Observation {
            id: "call_1".into(),
            name: "run_sql".into(),
            output: "x".repeat(1000),
            success: true,
        });
        assert_eq!(rendered.len(), "[Observation] ".len() + 300 + 3);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_editor_results_map_to_input() {
        assert_eq!(input_from(Ok("list tables".into())).unwrap(), Input::Line("list tables".into()));
        assert_eq!(input_from(Err(ReadlineError::Interrupted)).unwrap(), Input::Interrupted);
        assert_eq!(input_from(Err(ReadlineError::Eof)).unwrap(), Input::Eof);

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "tty gone");
        let err = input_from(Err(ReadlineError::Io(io))).unwrap_err();
        assert!(err.to_string().contains("tty gone"));
    }

    #[test]
    fn test_retry_hint_only_for_temporary_failures() {
        assert!(retry_hint(&AgentError::RateLimited("429".into())).is_some());
        assert!(retry_hint(&AgentError::ProviderUnavailable("connection refused".into())).is_some());
        assert!(retry_hint(&AgentError::Auth("401".into())).is_none());
    }

    #[test]
    fn test_pending_read_does_not_block_shutdown() {
        let (requests, pending) = std::sync::mpsc::channel::<ReadRequest>();
        // an editor thread stuck on the terminal, never answering
        std::thread::spawn(move || {
            let _held = pending.recv();
            std::thread::sleep(Duration::from_secs(30));
        });
        let reader = LineReader { requests };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let started = Instant::now();
        runtime.block_on(async {
            let read = tokio::time::timeout(Duration::from_millis(50), reader.read("User: ")).await;
            assert!(read.is_err());
        });
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key(Some("sk-proj-abcdef123456")), "sk-proj-...");
        assert_eq!(mask_key(Some("")), "Not Set");
        assert_eq!(mask_key(None), "Not Set");
    }
}
