//! MCP client: tool server process lifecycle and the `ToolBackend` seam.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    tool::{Arguments, ToolBackend, ToolDescriptor},
};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::McpError;
use super::transport::StdioTransport;
use super::types::{CallToolResult, InitializeResult, ListToolsResult, PROTOCOL_VERSION, ServerInfo};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for one tool call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period after closing stdin before the process is killed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on `tools/list` pages, against servers that loop cursors.
const MAX_LIST_PAGES: usize = 64;

// ─── Configuration ───────────────────────────────────────────────────────────

/// How to launch the tool server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Name used in logs and errors
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub init_timeout: Duration,
    pub call_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let name = std::path::Path::new(&command)
            .file_stem()
            .map_or_else(|| command.clone(), |s| s.to_string_lossy().into_owned());
        Self {
            name,
            command,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            init_timeout: INIT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// A connected tool server.
pub struct McpClient {
    name: String,
    transport: StdioTransport,
    /// Absent when connected over in-process streams
    process: Option<Child>,
    server_info: ServerInfo,
    call_timeout: Duration,
    shutdown_timeout: Duration,
}

impl McpClient {
    /// Spawn the server process and perform the initialization handshake.
    pub async fn spawn(config: &McpServerConfig) -> std::result::Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnFailed {
            name: config.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnFailed {
            name: config.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(config.name.clone(), stderr);
        }

        tracing::info!(server = %config.name, command = %config.command, pid = ?child.id(), "tool server started");

        let transport = StdioTransport::new(&config.name, stdout, stdin);
        let mut client = Self {
            name: config.name.clone(),
            transport,
            process: Some(child),
            server_info: ServerInfo::default(),
            call_timeout: config.call_timeout,
            shutdown_timeout: config.shutdown_timeout,
        };

        match tokio::time::timeout(config.init_timeout, client.initialize()).await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => {
                client.kill().await;
                Err(McpError::InitFailed {
                    name: config.name.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                client.kill().await;
                Err(McpError::InitFailed {
                    name: config.name.clone(),
                    reason: format!(
                        "initialization timed out after {}s",
                        config.init_timeout.as_secs()
                    ),
                })
            }
        }
    }

    /// Handshake over an existing transport (no child process).
    pub async fn connect(
        transport: StdioTransport,
        call_timeout: Duration,
    ) -> std::result::Result<Self, McpError> {
        let mut client = Self {
            name: transport.server_name().to_string(),
            transport,
            process: None,
            server_info: ServerInfo::default(),
            call_timeout,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        };
        client.initialize().await?;
        Ok(client)
    }

    async fn initialize(&mut self) -> std::result::Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result = self.transport.request("initialize", Some(params)).await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InvalidResponse {
                method: "initialize".into(),
                reason: e.to_string(),
            })?;

        if init.protocol_version.as_deref() != Some(PROTOCOL_VERSION) {
            tracing::debug!(
                server = %self.name,
                offered = PROTOCOL_VERSION,
                accepted = ?init.protocol_version,
                "protocol version differs"
            );
        }
        self.server_info = init.server_info.unwrap_or_default();

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        tracing::info!(
            server = %self.name,
            server_name = ?self.server_info.name,
            server_version = ?self.server_info.version,
            "tool server initialized"
        );
        Ok(())
    }

    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Enumerate every advertised tool, following pagination cursors.
    pub async fn list_all_tools(&mut self) -> std::result::Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request_with_timeout("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::InvalidResponse {
                    method: "tools/list".into(),
                    reason: e.to_string(),
                })?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(McpError::InvalidResponse {
            method: "tools/list".into(),
            reason: format!("more than {MAX_LIST_PAGES} pages"),
        })
    }

    /// Execute a tool and flatten its content to text.
    pub async fn call(
        &mut self,
        name: &str,
        arguments: &Arguments,
    ) -> std::result::Result<String, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.request_with_timeout("tools/call", Some(params)).await?;
        let call: CallToolResult =
            serde_json::from_value(result).map_err(|e| McpError::InvalidResponse {
                method: "tools/call".into(),
                reason: e.to_string(),
            })?;

        if call.is_error {
            let text = call.error_text();
            return Err(McpError::ToolFailed {
                tool: name.to_string(),
                message: if text.is_empty() {
                    format!("tool '{name}' reported an error")
                } else {
                    text
                },
            });
        }
        Ok(call.flatten())
    }

    async fn request_with_timeout(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, McpError> {
        if self.transport.is_closed() {
            return Err(McpError::Closed {
                name: self.name.clone(),
            });
        }
        let timeout = self.call_timeout;
        tokio::time::timeout(timeout, self.transport.request(method, params))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Close stdin, give the server a moment to exit, then kill it.
    pub async fn close(&mut self) {
        self.transport.close().await;
        let Some(mut child) = self.process.take() else {
            return;
        };
        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.name, %status, "tool server exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "tool server did not exit, killing it");
                let _ = child.kill().await;
            }
        }
    }

    async fn kill(&mut self) {
        self.transport.close().await;
        if let Some(mut child) = self.process.take() {
            let _ = child.kill().await;
        }
    }
}

/// Relay the server's stderr into the log.
fn forward_stderr(server: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "{line}");
        }
    });
}

#[async_trait]
impl ToolBackend for McpClient {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        self.list_all_tools()
            .await
            .map_err(|e| AgentError::Discovery(e.to_string()))
    }

    async fn call_tool(&mut self, name: &str, arguments: &Arguments) -> Result<String> {
        tracing::debug!(server = %self.name, tool = %name, "tools/call");
        self.call(name, arguments).await.map_err(AgentError::from)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.close().await;
        Ok(())
    }
}
