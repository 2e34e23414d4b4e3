//! Transcript Persistence
//!
//! Saves the whole transcript as a JSON array of role-tagged turns. Every
//! save overwrites the previous document.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::message::Transcript;

/// Transcript store trait for persistence
pub trait TranscriptStore: Send {
    /// Replace the stored transcript
    fn save(&self, transcript: &Transcript) -> Result<()>;

    /// Load the stored transcript, if any
    fn load(&self) -> Result<Option<Transcript>>;
}

/// Pretty-printed JSON file, replaced atomically on save
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "transcript.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TranscriptStore for JsonFileStore {
    fn save(&self, transcript: &Transcript) -> Result<()> {
        let json = transcript.to_json()?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), turns = transcript.len(), "transcript saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<Transcript>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let transcript = Transcript::from_json(&json).map_err(|e| {
            AgentError::Session(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Some(transcript))
    }
}

/// In-memory transcript store (for development/testing)
#[derive(Debug, Default)]
pub struct MemoryTranscriptStore {
    saved: Mutex<Option<Transcript>>,
    saves: Mutex<usize>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.lock().map_or(0, |n| *n)
    }
}

fn poisoned<T>(_: T) -> AgentError {
    AgentError::Session("transcript store lock poisoned".into())
}

impl TranscriptStore for MemoryTranscriptStore {
    fn save(&self, transcript: &Transcript) -> Result<()> {
        *self.saved.lock().map_err(poisoned)? = Some(transcript.clone());
        *self.saves.lock().map_err(poisoned)? += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<Transcript>> {
        Ok(self.saved.lock().map_err(poisoned)?.clone())
    }
}

impl<S: TranscriptStore + Sync> TranscriptStore for std::sync::Arc<S> {
    fn save(&self, transcript: &Transcript) -> Result<()> {
        self.as_ref().save(transcript)
    }

    fn load(&self) -> Result<Option<Transcript>> {
        self.as_ref().load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolCallRequest, ToolResult};

    fn sample() -> Transcript {
        let mut transcript = Transcript::new("You are a database agent.");
        transcript.push_user("tables in db1?").unwrap();
        transcript
            .push_assistant(
                Some("[Thought]\nlist them".into()),
                vec![ToolCallRequest::from_wire(
                    "call_1",
                    "list_tables",
                    r#"{"database_path": "db1"}"#,
                )],
            )
            .unwrap();
        transcript
            .push_tool_result(&ToolResult {
                name: "list_tables".into(),
                id: "call_1".into(),
                success: true,
                output: r#"["users","products","orders"]"#.into(),
            })
            .unwrap();
        transcript
            .push_assistant(Some("users, products, orders".into()), vec![])
            .unwrap();
        transcript
    }

    #[test]
    fn test_file_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("messages.json"));

        assert!(store.load().unwrap().is_none());

        let mut transcript = sample();
        store.save(&transcript).unwrap();
        assert_eq!(store.load().unwrap(), Some(transcript.clone()));

        transcript.reset();
        store.save(&transcript).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!dir.path().join("messages.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(&path, r#"[{"role": "user", "content": "no system"}]"#).unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTranscriptStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().unwrap().unwrap().len(), 5);
    }
}
