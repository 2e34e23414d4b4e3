//! JSON-RPC over stdio transport.
//!
//! Writes one request per line to the server's stdin and reads lines from
//! its stdout until the matching response shows up. Lines that are not JSON
//! (server log output) and responses to other ids are skipped.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::McpError;
use super::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

type Reader = BufReader<Box<dyn AsyncRead + Unpin + Send>>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// Bi-directional JSON-RPC transport over a pair of byte streams.
pub struct StdioTransport {
    server_name: String,
    writer: Option<Writer>,
    reader: Reader,
    next_id: u64,
}

impl StdioTransport {
    /// Create a transport over a child's stdin/stdout, or any stream pair.
    pub fn new<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Some(Box::new(writer)),
            reader: BufReader::new(Box::new(reader)),
            next_id: 1,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn write_line<T: serde::Serialize>(&mut self, message: &T) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| self.transport_error(format!("failed to serialize message: {e}")))?;
        json.push('\n');

        let Some(writer) = self.writer.as_mut() else {
            return Err(McpError::Closed {
                name: self.server_name.clone(),
            });
        };
        let written = match writer.write_all(json.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))
    }

    /// Send a request and wait for the response with the same id.
    ///
    /// Returns the `result` member, or the server's error object as
    /// [`McpError::ServerError`].
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;

        tracing::trace!(server = %self.server_name, id, method, "sending request");
        self.write_line(&JsonRpcRequest::new(id, method, params))
            .await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error(
                    "server stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                Ok(message) if message.answers(id) => return extract_result(message),
                Ok(message) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = ?message.id,
                        method = ?message.method,
                        "skipping unrelated message"
                    );
                }
                Err(_) => {
                    tracing::debug!(server = %self.server_name, line = trimmed, "skipping non-JSON-RPC output");
                }
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.write_line(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Close the write side; a well-behaved server exits on EOF.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

/// Turn a response into its result, converting error objects to `McpError`.
pub fn extract_result(message: JsonRpcMessage) -> Result<serde_json::Value, McpError> {
    if let Some(err) = message.error {
        let message = match err.data {
            Some(serde_json::Value::String(detail)) => format!("{} ({detail})", err.message),
            Some(serde_json::Value::Null) | None => err.message,
            Some(detail) => format!("{} ({detail})", err.message),
        };
        return Err(McpError::ServerError {
            code: err.code,
            message,
        });
    }

    message.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
    })
}
