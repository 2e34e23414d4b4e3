//! Conversation Transcript
//!
//! Turns exchanged between the operator, the model and the tool service,
//! kept in an append-only [`Transcript`] that refuses any sequence the model
//! API would reject.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AgentError, Result};
use crate::tool::{ToolCallRequest, ToolResult};

/// Role of a turn's author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (model) reply
    Assistant,
    /// Tool result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single entry in the transcript, tagged by role when persisted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub const fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    /// Text content, if the turn carries any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Tool { content, .. } => {
                Some(content.as_str())
            }
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls requested by an assistant turn
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Ordered conversation history.
///
/// Invariants:
/// - exactly one system turn, at index 0
/// - tool call ids are unique across the transcript
/// - every tool call is answered by one tool turn, in request order, before
///   any other turn is appended
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Turn>", into = "Vec<Turn>")]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false: a transcript holds at least its system turn
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn system_prompt(&self) -> &str {
        self.turns.first().and_then(Turn::text).unwrap_or_default()
    }

    /// Tool calls of the latest assistant turn that have no result yet
    pub fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        let Some(pos) = self
            .turns
            .iter()
            .rposition(|t| matches!(t, Turn::Assistant { .. }))
        else {
            return &[];
        };
        let calls = self.turns[pos].tool_calls();
        let answered = self.turns.len() - pos - 1;
        calls.get(answered..).unwrap_or_default()
    }

    /// Whether the transcript may be sent to the model
    pub fn is_settled(&self) -> bool {
        self.pending_tool_calls().is_empty()
    }

    fn ensure_settled(&self, appending: Role) -> Result<()> {
        match self.pending_tool_calls().first() {
            Some(call) => Err(AgentError::Transcript(format!(
                "cannot append a {appending} turn while tool call '{}' ({}) is unanswered",
                call.id, call.name
            ))),
            None => Ok(()),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<()> {
        self.ensure_settled(Role::User)?;
        self.turns.push(Turn::user(content));
        Ok(())
    }

    /// Append a model reply exactly as returned
    pub fn push_assistant(
        &mut self,
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<()> {
        self.ensure_settled(Role::Assistant)?;

        let mut seen: HashSet<&str> = self
            .turns
            .iter()
            .flat_map(|t| t.tool_calls().iter().map(|c| c.id.as_str()))
            .collect();
        for call in &tool_calls {
            if call.id.is_empty() {
                return Err(AgentError::Transcript(format!(
                    "tool call to '{}' has no id",
                    call.name
                )));
            }
            if !seen.insert(call.id.as_str()) {
                return Err(AgentError::Transcript(format!(
                    "duplicate tool call id '{}'",
                    call.id
                )));
            }
        }

        self.turns.push(Turn::assistant(content, tool_calls));
        Ok(())
    }

    /// Answer the next pending tool call
    pub fn push_tool_result(&mut self, result: &ToolResult) -> Result<()> {
        let Some(expected) = self.pending_tool_calls().first() else {
            return Err(AgentError::Transcript(format!(
                "tool result '{}' does not answer any pending call",
                result.id
            )));
        };
        if expected.id != result.id {
            return Err(AgentError::Transcript(format!(
                "tool result '{}' arrived before result for '{}'",
                result.id, expected.id
            )));
        }
        self.turns
            .push(Turn::tool(&result.id, &result.name, &result.output));
        Ok(())
    }

    /// Answer every pending call with the same observation.
    ///
    /// Used when a turn is abandoned mid-dispatch. Returns how many calls
    /// were settled.
    pub fn settle_pending(&mut self, observation: &str) -> usize {
        let pending: Vec<ToolCallRequest> = self.pending_tool_calls().to_vec();
        for call in &pending {
            self.turns.push(Turn::tool(&call.id, &call.name, observation));
        }
        pending.len()
    }

    /// Drop everything but the system turn
    pub fn reset(&mut self) {
        self.turns.truncate(1);
    }

    /// Check every invariant over the whole transcript
    pub fn validate(turns: &[Turn]) -> Result<()> {
        match turns.first() {
            Some(Turn::System { .. }) => {}
            _ => {
                return Err(AgentError::Transcript(
                    "transcript must start with a system turn".into(),
                ));
            }
        }

        let mut seen_ids = HashSet::new();
        let mut pending: std::collections::VecDeque<&ToolCallRequest> =
            std::collections::VecDeque::new();

        for (idx, turn) in turns.iter().enumerate().skip(1) {
            match turn {
                Turn::System { .. } => {
                    return Err(AgentError::Transcript(format!(
                        "system turn at position {idx}"
                    )));
                }
                Turn::Tool { tool_call_id, .. } => match pending.pop_front() {
                    Some(call) if &call.id == tool_call_id => {}
                    Some(call) => {
                        return Err(AgentError::Transcript(format!(
                            "tool result '{tool_call_id}' at position {idx} does not match call '{}'",
                            call.id
                        )));
                    }
                    None => {
                        return Err(AgentError::Transcript(format!(
                            "unrequested tool result '{tool_call_id}' at position {idx}"
                        )));
                    }
                },
                Turn::User { .. } | Turn::Assistant { .. } => {
                    if let Some(call) = pending.front() {
                        return Err(AgentError::Transcript(format!(
                            "tool call '{}' unanswered at position {idx}",
                            call.id
                        )));
                    }
                    for call in turn.tool_calls() {
                        if !seen_ids.insert(call.id.as_str()) {
                            return Err(AgentError::Transcript(format!(
                                "duplicate tool call id '{}'",
                                call.id
                            )));
                        }
                        pending.push_back(call);
                    }
                }
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl TryFrom<Vec<Turn>> for Transcript {
    type Error = AgentError;

    /// A persisted transcript may end with unanswered calls (saved
    /// mid-turn); everything before that must be consistent.
    fn try_from(turns: Vec<Turn>) -> Result<Self> {
        let last_assistant = turns
            .iter()
            .rposition(|t| matches!(t, Turn::Assistant { .. }));
        let check = match last_assistant {
            Some(pos)
                if turns[pos + 1..]
                    .iter()
                    .all(|t| matches!(t, Turn::Tool { .. })) =>
            {
                let answered = turns.len() - pos - 1;
                if answered > turns[pos].tool_calls().len() {
                    Self::validate(&turns)
                } else {
                    let mut complete = turns[..=pos].to_vec();
                    if let Turn::Assistant { tool_calls, .. } = &mut complete[pos] {
                        tool_calls.truncate(answered);
                    }
                    complete.extend_from_slice(&turns[pos + 1..]);
                    Self::validate(&complete)
                }
            }
            _ => Self::validate(&turns),
        };
        check?;
        Ok(Self { turns })
    }
}

impl From<Transcript> for Vec<Turn> {
    fn from(transcript: Transcript) -> Self {
        transcript.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::from_wire(id, name, r#"{"database_path": "db1"}"#)
    }

    fn result(id: &str, name: &str, output: &str) -> ToolResult {
        ToolResult {
            name: name.into(),
            id: id.into(),
            success: true,
            output: output.into(),
        }
    }

    #[test]
    fn test_transcript_starts_with_system() {
        let transcript = Transcript::new("You are helpful.");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.system_prompt(), "You are helpful.");
        assert!(transcript.is_settled());
    }

    #[test]
    fn test_pending_calls_block_other_turns() {
        let mut transcript = Transcript::new("sys");
        transcript.push_user("compare").unwrap();
        transcript
            .push_assistant(None, vec![call("a", "list_tables"), call("b", "list_tables")])
            .unwrap();

        assert_eq!(transcript.pending_tool_calls().len(), 2);
        assert!(transcript.push_user("hello?").is_err());
        assert!(transcript.push_assistant(Some("done".into()), vec![]).is_err());

        // out of order
        assert!(transcript.push_tool_result(&result("b", "list_tables", "[]")).is_err());

        transcript.push_tool_result(&result("a", "list_tables", "[]")).unwrap();
        assert_eq!(transcript.pending_tool_calls()[0].id, "b");
        transcript.push_tool_result(&result("b", "list_tables", "[]")).unwrap();
        assert!(transcript.is_settled());

        assert!(transcript.push_tool_result(&result("c", "list_tables", "[]")).is_err());
        transcript.push_assistant(Some("done".into()), vec![]).unwrap();
        assert!(Transcript::validate(transcript.turns()).is_ok());
    }

    #[test]
    fn test_duplicate_call_ids_rejected() {
        let mut transcript = Transcript::new("sys");
        transcript.push_user("go").unwrap();
        transcript.push_assistant(None, vec![call("a", "list_tables")]).unwrap();
        transcript.push_tool_result(&result("a", "list_tables", "[]")).unwrap();

        let err = transcript
            .push_assistant(None, vec![call("a", "list_tables")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate tool call id 'a'"));

        let err = transcript
            .push_assistant(None, vec![call("x", "t"), call("x", "t")])
            .unwrap_err();
        assert!(matches!(err, AgentError::Transcript(_)));
    }

    #[test]
    fn test_settle_pending() {
        let mut transcript = Transcript::new("sys");
        transcript.push_user("go").unwrap();
        transcript
            .push_assistant(None, vec![call("a", "t"), call("b", "t")])
            .unwrap();
        transcript.push_tool_result(&result("a", "t", "ok")).unwrap();

        assert_eq!(transcript.settle_pending("Error: tool call cancelled"), 1);
        assert!(transcript.is_settled());
        assert_eq!(transcript.last().unwrap().text(), Some("Error: tool call cancelled"));
        assert_eq!(transcript.settle_pending("unused"), 0);
    }

    #[test]
    fn test_persisted_shape() {
        let mut transcript = Transcript::new("sys");
        transcript.push_user("tables?").unwrap();
        transcript
            .push_assistant(Some("[Thought]\nlook".into()), vec![call("call_1", "list_tables")])
            .unwrap();
        transcript
            .push_tool_result(&result("call_1", "list_tables", r#"["users"]"#))
            .unwrap();

        let value = serde_json::to_value(&transcript).unwrap();
        assert_eq!(
            value,
            json!([
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "tables?"},
                {"role": "assistant", "content": "[Thought]\nlook", "tool_calls": [
                    {"id": "call_1", "name": "list_tables", "arguments": {"database_path": "db1"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "name": "list_tables", "content": "[\"users\"]"}
            ])
        );
    }

    #[test]
    fn test_json_round_trip() {
        let mut transcript = Transcript::new("sys");
        transcript.push_user("run it").unwrap();
        transcript
            .push_assistant(
                None,
                vec![
                    call("c1", "list_tables"),
                    ToolCallRequest::from_wire("c2", "run_sql", "{bad"),
                ],
            )
            .unwrap();
        transcript.push_tool_result(&result("c1", "list_tables", "[]")).unwrap();
        transcript
            .push_tool_result(&result("c2", "run_sql", "Error: invalid arguments"))
            .unwrap();
        transcript.push_assistant(Some("Nothing there.".into()), vec![]).unwrap();

        let json = transcript.to_json().unwrap();
        let loaded = Transcript::from_json(&json).unwrap();
        assert_eq!(loaded, transcript);
        assert_eq!(
            loaded.turns()[2].tool_calls()[1].raw_arguments.as_deref(),
            Some("{bad")
        );
    }

    #[test]
    fn test_load_rejects_broken_transcripts() {
        let no_system = r#"[{"role": "user", "content": "hi"}]"#;
        assert!(Transcript::from_json(no_system).is_err());

        let orphan_result = r#"[
            {"role": "system", "content": "sys"},
            {"role": "tool", "tool_call_id": "x", "name": "t", "content": "?"}
        ]"#;
        assert!(Transcript::from_json(orphan_result).is_err());

        let dangling_then_user = r#"[
            {"role": "system", "content": "sys"},
            {"role": "assistant", "tool_calls": [{"id": "x", "name": "t", "arguments": {}}]},
            {"role": "user", "content": "hello"}
        ]"#;
        assert!(Transcript::from_json(dangling_then_user).is_err());
    }

    #[test]
    fn test_load_accepts_trailing_pending_calls() {
        let saved_mid_turn = r#"[
            {"role": "system", "content": "sys"},
            {"role": "user", "content": "go"},
            {"role": "assistant", "tool_calls": [
                {"id": "x", "name": "t", "arguments": {}},
                {"id": "y", "name": "t", "arguments": {}}
            ]},
            {"role": "tool", "tool_call_id": "x", "name": "t", "content": "ok"}
        ]"#;
        let transcript = Transcript::from_json(saved_mid_turn).unwrap();
        assert_eq!(transcript.pending_tool_calls()[0].id, "y");
    }

    #[test]
    fn test_reset_keeps_system_turn() {
        let mut transcript = Transcript::new("sys");
        transcript.push_user("a").unwrap();
        transcript.push_assistant(Some("b".into()), vec![]).unwrap();
        transcript.reset();
        assert_eq!(transcript.turns(), &[Turn::system("sys")]);
    }
}
