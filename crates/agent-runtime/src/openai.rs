//! OpenAI-compatible LLM Provider
//!
//! Implementation of `LlmProvider` over the Chat Completions API with native
//! function calling. Any server speaking the same wire format works, including
//! Ollama's `/v1` endpoint.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::Turn,
    provider::{
        AssistantReply, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage,
    },
    tool::{ToolCallRequest, ToolSpec},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API base URL, including the version segment
    pub base_url: String,

    /// Bearer token; local servers usually need none
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url);
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            base_url,
            api_key,
            timeout_secs,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

/// OpenAI-compatible chat completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env())
    }

    pub const fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Convert transcript turns to chat messages
    fn convert_turns(turns: &[Turn]) -> Vec<ChatMessage> {
        turns
            .iter()
            .map(|turn| match turn {
                Turn::System { content } => ChatMessage::plain("system", content),
                Turn::User { content } => ChatMessage::plain("user", content),
                Turn::Assistant {
                    content,
                    tool_calls,
                } => ChatMessage {
                    role: "assistant",
                    content: content.clone().unwrap_or_default(),
                    tool_calls: tool_calls.iter().map(WireToolCall::from).collect(),
                    tool_call_id: None,
                },
                Turn::Tool {
                    tool_call_id,
                    content,
                    ..
                } => ChatMessage {
                    role: "tool",
                    content: content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(tool_call_id.clone()),
                },
            })
            .collect()
    }

    /// Convert a chat completion to an assistant reply
    fn convert_response(response: ChatResponse, requested_model: &str) -> Result<AssistantReply> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ModelBackend("response contained no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(ResponseToolCall::into_request)
            .collect();

        Ok(AssistantReply {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            model: response.model.unwrap_or_else(|| requested_model.to_string()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_wire),
        })
    }

    async fn error_for_status(response: reqwest::Response) -> AgentError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);
        map_status(status, detail)
    }
}

/// Map an HTTP failure status onto the model backend error kinds
fn map_status(status: StatusCode, detail: String) -> AgentError {
    let detail = if detail.trim().is_empty() {
        status.to_string()
    } else {
        detail
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(detail),
        s if s.is_server_error() => AgentError::ProviderUnavailable(format!("{s}: {detail}")),
        s => AgentError::ModelBackend(format!("{s}: {detail}")),
    }
}

fn map_transport(err: &reqwest::Error) -> AgentError {
    if err.is_connect() || err.is_timeout() {
        AgentError::ProviderUnavailable(err.to_string())
    } else {
        AgentError::ModelBackend(err.to_string())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        turns: &[Turn],
        tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> Result<AssistantReply> {
        let request = ChatRequest {
            model: &options.model,
            messages: Self::convert_turns(turns),
            tools,
            tool_choice: (!tools.is_empty()).then_some(options.tool_choice.as_str()),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        tracing::debug!(
            model = %options.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "sending chat completion"
        );

        let response = self
            .authorize(self.client.post(self.config.endpoint("chat/completions")))
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ModelBackend(format!("unreadable completion: {e}")))?;

        Self::convert_response(body, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorize(self.client.get(self.config.endpoint("models")))
            .send()
            .await
            .map_err(|e| map_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let body: ModelsResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ModelBackend(format!("unreadable model list: {e}")))?;

        Ok(body
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                owned_by: m.owned_by,
            })
            .collect())
    }
}

// ─── Wire Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolSpec],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_tools(tools: &&[ToolSpec]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl From<&ToolCallRequest> for WireToolCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            kind: "function",
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments_json(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    /// A JSON string per the API; some compatible servers send an object
    #[serde(default)]
    arguments: Value,
}

impl ResponseToolCall {
    fn into_request(self) -> ToolCallRequest {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
        let raw = match self.function.arguments {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        ToolCallRequest::from_wire(id, self.function.name, &raw)
    }
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ToolDescriptor;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = OpenAiConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let config = OpenAiConfig {
            base_url: "http://localhost:11434/v1/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint("chat/completions"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_turn_conversion() {
        let call =
            ToolCallRequest::from_wire("call_1", "list_tables", r#"{"database_path":"db1"}"#);
        let turns = vec![
            Turn::system("You are a database agent."),
            Turn::user("tables in db1?"),
            Turn::assistant(None, vec![call]),
            Turn::tool("call_1", "list_tables", r#"["users"]"#),
        ];

        let wire = serde_json::to_value(OpenAiProvider::convert_turns(&turns)).unwrap();
        assert_eq!(wire[0], json!({"role": "system", "content": "You are a database agent."}));
        assert_eq!(
            wire[2],
            json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "list_tables", "arguments": "{\"database_path\":\"db1\"}"}
                }]
            })
        );
        assert_eq!(
            wire[3],
            json!({"role": "tool", "content": "[\"users\"]", "tool_call_id": "call_1"})
        );
    }

    #[test]
    fn test_request_omits_tools_when_none() {
        let request = ChatRequest {
            model: "gpt-4o",
            messages: vec![ChatMessage::plain("user", "hi")],
            tools: &[],
            tool_choice: None,
            temperature: None,
            max_tokens: None,
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire.get("tools").is_none());
        assert!(wire.get("tool_choice").is_none());

        let specs = vec![ToolSpec::from(&ToolDescriptor {
            name: "run_sql".into(),
            description: "Execute a SQL query.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        })];
        let request = ChatRequest {
            tools: &specs,
            tool_choice: Some("auto"),
            ..request
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["tool_choice"], "auto");
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "run_sql");
    }

    #[test]
    fn test_response_conversion() {
        let body: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "[Thought]\nList both databases.",
                    "tool_calls": [
                        {"id": "call_a", "type": "function",
                         "function": {"name": "list_tables", "arguments": "{\"database_path\":\"db1\"}"}},
                        {"type": "function",
                         "function": {"name": "list_tables", "arguments": {"database_path": "db2"}}},
                        {"id": "call_c", "type": "function",
                         "function": {"name": "run_sql", "arguments": "{\"query\": "}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();

        let reply = OpenAiProvider::convert_response(body, "gpt-4o").unwrap();
        assert_eq!(reply.model, "gpt-4o-2024-08-06");
        assert_eq!(reply.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(reply.tool_calls.len(), 3);
        assert_eq!(reply.tool_calls[0].id, "call_a");
        assert_eq!(reply.tool_calls[0].arguments["database_path"], "db1");
        assert!(reply.tool_calls[1].id.starts_with("call_"));
        assert_eq!(reply.tool_calls[1].arguments["database_path"], "db2");
        assert!(reply.tool_calls[2].malformed_reason().is_some());
        assert_eq!(reply.usage.map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn test_empty_choices_is_backend_error() {
        let body: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let err = OpenAiProvider::convert_response(body, "gpt-4o").unwrap_err();
        assert!(matches!(err, AgentError::ModelBackend(_)));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            AgentError::Auth(_)
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, String::new()),
            AgentError::ProviderUnavailable(_)
        ));
        let err = map_status(StatusCode::BAD_REQUEST, "unknown model".into());
        assert!(matches!(err, AgentError::ModelBackend(ref m) if m.contains("unknown model")));
        assert!(err.is_model_backend());
    }
}
