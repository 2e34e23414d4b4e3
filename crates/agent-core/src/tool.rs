//! Tool System
//!
//! Tools live outside the process. A [`ToolBackend`] enumerates and executes
//! them; the [`ToolCatalog`] holds what was discovered at startup and maps it
//! to the model's function-calling format; the [`ToolInvoker`] forwards calls
//! and turns every failure into a textual observation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{AgentError, Result};

/// Tool call arguments: JSON object keyed by parameter name
pub type Arguments = serde_json::Map<String, Value>;

/// Default cap on the length of an error observation
pub const DEFAULT_MAX_ERROR_CHARS: usize = 2000;

/// Tool declaration as advertised by the tool service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the arguments
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: Value,
}

/// Function-calling tool spec sent to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

/// Function part of a [`ToolSpec`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolSpec {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            kind: "function".into(),
            function: FunctionSpec {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.input_schema.clone(),
            },
        }
    }
}

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id, unique within the conversation
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Arguments,

    /// Argument text exactly as the model produced it, kept only when it
    /// did not decode to a JSON object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// Build a request from the wire form where arguments arrive as a JSON
    /// string. Undecodable text is preserved in `raw_arguments`.
    pub fn from_wire(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let mut call = Self::new(id, name, Arguments::new());
        if raw.trim().is_empty() {
            return call;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => call.arguments = map,
            _ => call.raw_arguments = Some(raw.to_string()),
        }
        call
    }

    /// Arguments in wire form (the raw text when it never decoded)
    pub fn arguments_json(&self) -> String {
        self.raw_arguments.clone().unwrap_or_else(|| {
            serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".into())
        })
    }

    /// Why the arguments are unusable, if they are
    pub fn malformed_reason(&self) -> Option<String> {
        let raw = self.raw_arguments.as_deref()?;
        Some(match serde_json::from_str::<Value>(raw) {
            Ok(other) => format!("expected a JSON object, got {}", json_type_name(&other)),
            Err(e) => format!("arguments are not valid JSON: {e}"),
        })
    }
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Call ID from the request
    pub id: String,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (tool text or `Error: ...` observation)
    pub output: String,
}

impl ToolResult {
    pub fn success(call: &ToolCallRequest, output: impl Into<String>) -> Self {
        Self {
            name: call.name.clone(),
            id: call.id.clone(),
            success: true,
            output: output.into(),
        }
    }

    /// Absorb an error into a bounded `Error: <cause>` observation
    pub fn failure(call: &ToolCallRequest, error: &AgentError, max_chars: usize) -> Self {
        Self {
            name: call.name.clone(),
            id: call.id.clone(),
            success: false,
            output: error_observation(error, max_chars),
        }
    }
}

/// Render an error as the observation text appended to the transcript.
pub fn error_observation(error: &AgentError, max_chars: usize) -> String {
    let cause = truncate_text(&error.observation_cause(), max_chars, "...(truncated)");
    format!("Error: {cause}")
}

/// Cut `text` to at most `max_chars` characters, appending `suffix` when cut.
pub fn truncate_text(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{suffix}", &text[..idx]),
        None => text.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_schema_type(value: &Value, expected: &str) -> bool {
    match expected {
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        other => json_type_name(value) == other,
    }
}

/// External tool-execution service
///
/// The connection is owned by exactly one agent loop, so methods take
/// `&mut self` and implementors need not be `Sync`.
#[async_trait]
pub trait ToolBackend: Send {
    /// Enumerate the advertised tools
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>>;

    /// Execute a tool and return its textual result
    async fn call_tool(&mut self, name: &str, arguments: &Arguments) -> Result<String>;

    /// Release the connection
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Tools discovered at session start
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    descriptors: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    /// Enumerate tools from the backend.
    ///
    /// Any failure, including a malformed descriptor, is a discovery error.
    pub async fn discover(backend: &mut dyn ToolBackend) -> Result<Self> {
        let descriptors = backend.list_tools().await.map_err(|e| match e {
            AgentError::Discovery(_) => e,
            other => AgentError::Discovery(other.to_string()),
        })?;
        let catalog = Self::from_descriptors(descriptors)?;
        tracing::info!(tools = ?catalog.names(), "discovered {} tools", catalog.len());
        Ok(catalog)
    }

    /// Build a catalog, rejecting empty or duplicate names and non-object schemas
    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(AgentError::Discovery("tool descriptor without a name".into()));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(AgentError::Discovery(format!(
                    "duplicate tool name '{}'",
                    descriptor.name
                )));
            }
            if !descriptor.input_schema.is_object() {
                return Err(AgentError::Discovery(format!(
                    "tool '{}' has no input schema object",
                    descriptor.name
                )));
            }
        }
        Ok(Self { descriptors })
    }

    /// Function specs in advertised order, one per descriptor
    pub fn to_model_format(&self) -> Vec<ToolSpec> {
        self.descriptors.iter().map(ToolSpec::from).collect()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Check a call against the declared schema: required properties and
    /// primitive property types. Unknown tools pass; the service decides.
    pub fn validate_arguments(&self, call: &ToolCallRequest) -> Result<()> {
        if let Some(reason) = call.malformed_reason() {
            return Err(AgentError::MalformedToolArguments {
                tool: call.name.clone(),
                reason,
            });
        }
        let Some(descriptor) = self.get(&call.name) else {
            tracing::warn!(tool = %call.name, "call to a tool that was never advertised");
            return Ok(());
        };
        let schema = &descriptor.input_schema;

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for param in required.iter().filter_map(Value::as_str) {
                if !call.arguments.contains_key(param) {
                    return Err(AgentError::MalformedToolArguments {
                        tool: call.name.clone(),
                        reason: format!("missing required parameter '{param}'"),
                    });
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (param, value) in &call.arguments {
                let expected = properties
                    .get(param)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str);
                if let Some(expected) = expected {
                    if !matches_schema_type(value, expected) {
                        return Err(AgentError::MalformedToolArguments {
                            tool: call.name.clone(),
                            reason: format!(
                                "parameter '{param}' should be {expected}, got {}",
                                json_type_name(value)
                            ),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// System prompt section describing available tools
    pub fn prompt_section(&self) -> String {
        let mut prompt = String::from("# AVAILABLE TOOLS:\n");
        for (idx, descriptor) in self.descriptors.iter().enumerate() {
            let params: Vec<&str> = descriptor
                .input_schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().map(String::as_str).collect())
                .unwrap_or_default();
            let summary = descriptor.description.lines().find(|l| !l.trim().is_empty());
            prompt.push_str(&format!(
                "{}. {}({}) - {}\n",
                idx + 1,
                descriptor.name,
                params.join(", "),
                summary.map_or("", str::trim)
            ));
        }
        prompt
    }
}

/// Forwards tool calls to the backend; never fails
pub struct ToolInvoker {
    backend: Box<dyn ToolBackend>,
    max_error_chars: usize,
}

impl ToolInvoker {
    pub fn new(backend: Box<dyn ToolBackend>) -> Self {
        Self {
            backend,
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
        }
    }

    pub fn with_max_error_chars(mut self, max_chars: usize) -> Self {
        self.max_error_chars = max_chars;
        self
    }

    pub const fn max_error_chars(&self) -> usize {
        self.max_error_chars
    }

    /// Run discovery over the owned backend
    pub async fn discover(&mut self) -> Result<ToolCatalog> {
        ToolCatalog::discover(self.backend.as_mut()).await
    }

    /// Execute a named tool, returning the observation text
    pub async fn invoke(&mut self, name: &str, arguments: &Arguments) -> String {
        match self.backend.call_tool(name, arguments).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                error_observation(&e, self.max_error_chars)
            }
        }
    }

    /// Execute a model-issued call
    pub async fn execute(&mut self, call: &ToolCallRequest) -> ToolResult {
        if let Some(reason) = call.malformed_reason() {
            let err = AgentError::MalformedToolArguments {
                tool: call.name.clone(),
                reason,
            };
            tracing::warn!(tool = %call.name, call_id = %call.id, "{err}");
            return ToolResult::failure(call, &err, self.max_error_chars);
        }

        match self.backend.call_tool(&call.name, &call.arguments).await {
            Ok(output) => ToolResult::success(call, output),
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                ToolResult::failure(call, &e, self.max_error_chars)
            }
        }
    }

    /// Close the backend connection
    pub async fn shutdown(&mut self) -> Result<()> {
        self.backend.shutdown().await
    }
}
