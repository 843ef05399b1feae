//! Transcript persistence to the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PigeonError, Result};
use crate::message::Message;
use crate::transcript::Transcript;

const TRANSCRIPT_FILE: &str = "chat.json";

/// Persists the conversation transcript as a JSON file.
///
/// The store writes the full ordered message sequence after every mutation
/// and reads it back on startup. Writes are explicit and acknowledged: the
/// caller sees the error instead of a silent drop. Loading is lenient —
/// records with a missing or malformed timestamp default-construct rather
/// than failing the whole load.
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    /// Creates a store rooted at the given directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .map_err(|e| PigeonError::io(format!("Failed to create chat directory: {e}")))?;
        Ok(Self { base_dir })
    }

    /// Loads the persisted transcript, or an empty one if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a
    /// JSON array of message records.
    pub fn load(&self) -> Result<Transcript> {
        let path = self.transcript_path();
        if !path.exists() {
            return Ok(Transcript::new());
        }

        let json = fs::read_to_string(&path)
            .map_err(|e| PigeonError::io(format!("Failed to read {path:?}: {e}")))?;
        let messages: Vec<Message> = serde_json::from_str(&json)?;
        Ok(Transcript::from_messages(messages))
    }

    /// Writes the full transcript, replacing any previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, transcript: &Transcript) -> Result<()> {
        let path = self.transcript_path();
        let json = serde_json::to_string_pretty(transcript.messages())?;
        fs::write(&path, json)
            .map_err(|e| PigeonError::io(format!("Failed to write {path:?}: {e}")))?;
        Ok(())
    }

    fn transcript_path(&self) -> PathBuf {
        self.base_dir.join(TRANSCRIPT_FILE)
    }
}
