//! Thought Parsing
//!
//! Models are prompted to open a reply with a reasoning block:
//!
//! ```text
//! [Thought]
//! reasoning line
//! reasoning line
//!
//! answer text ...
//! ```
//!
//! The marker line may also carry the first reasoning line inline
//! (`[Thought] reasoning`). The first blank line after the marker closes the
//! block. Text before the marker belongs to the answer.

use serde::{Deserialize, Serialize};

/// A model reply split into reasoning and visible answer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReply {
    pub reasoning: Option<String>,
    pub answer: Option<String>,
}

/// Splits `[Thought]` reasoning from the answer. Pure and total.
pub struct ThoughtParser;

impl ThoughtParser {
    pub const MARKER: &'static str = "[Thought]";

    pub fn parse(raw: &str) -> ParsedReply {
        let lines: Vec<&str> = raw.lines().collect();

        let Some(marker_idx) = lines
            .iter()
            .position(|l| l.trim_start().starts_with(Self::MARKER))
        else {
            return ParsedReply {
                reasoning: None,
                answer: non_empty(raw),
            };
        };

        let inline = lines[marker_idx].trim_start()[Self::MARKER.len()..]
            .trim_start_matches(':')
            .trim();

        let body_start = marker_idx + 1;
        let blank_idx = lines[body_start..]
            .iter()
            .position(|l| l.trim().is_empty())
            .map(|offset| body_start + offset);
        let body_end = blank_idx.unwrap_or(lines.len());

        let mut reasoning: Vec<&str> = Vec::new();
        if !inline.is_empty() {
            reasoning.push(inline);
        }
        reasoning.extend_from_slice(&lines[body_start..body_end]);

        let before = lines[..marker_idx].join("\n");
        let after = blank_idx.map_or_else(String::new, |idx| lines[idx + 1..].join("\n"));
        let answer: Vec<&str> = [before.trim(), after.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();

        ParsedReply {
            reasoning: non_empty(&reasoning.join("\n")),
            answer: non_empty(&answer.join("\n\n")),
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
