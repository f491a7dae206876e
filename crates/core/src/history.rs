//! Persisted conversation history.
//!
//! The whole history is one JSON document, `{"conversations": [...]}`,
//! rewritten on every append. A missing or unreadable document is treated as
//! empty and recreated by the next append.

use crate::session::{Session, THEMES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn default_theme() -> String {
    THEMES[0].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub user_input: String,
    pub ai_response: String,
    pub english_level: String,
    pub mode: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,
}

impl HistoryEntry {
    /// Builds an entry stamped with the current local time and the session's settings.
    pub fn record(
        session: &Session,
        user_input: impl Into<String>,
        ai_response: impl Into<String>,
        evaluation: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            user_input: user_input.into(),
            ai_response: ai_response.into(),
            english_level: session.level.label().to_string(),
            mode: session.mode.label().to_string(),
            theme: session.theme.as_str().to_string(),
            evaluation,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryDocument {
    #[serde(default)]
    conversations: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HistoryDocument {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return HistoryDocument::default(),
            Err(e) => {
                tracing::warn!("Failed to read history {}: {}", self.path.display(), e);
                return HistoryDocument::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(
                "History {} is not valid JSON, starting a new one: {}",
                self.path.display(),
                e
            );
            HistoryDocument::default()
        })
    }

    /// Appends one entry and rewrites the document.
    ///
    /// The new document is written to a sibling temporary file and renamed
    /// over the old one, so readers never see a partial write.
    pub fn append(&self, entry: HistoryEntry) -> Result<()> {
        let mut document = self.load();
        document.conversations.push(entry);

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create history directory: {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temporary history file")?;
        serde_json::to_writer_pretty(&mut tmp, &document).context("Failed to serialize history")?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write history: {}", self.path.display()))?;

        tracing::debug!(
            "History now holds {} entries",
            document.conversations.len()
        );
        Ok(())
    }

    /// The last `n` entries, oldest first. Empty when the document cannot be read.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let mut conversations = self.load().conversations;
        let skip = conversations.len().saturating_sub(n);
        conversations.drain(..skip);
        conversations
    }
}

/// Formats entries as `User: ...` / `AI: ...` lines for error analysis.
pub fn format_for_analysis(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("User: {}\nAI: {}", entry.user_input, entry.ai_response))
        .collect::<Vec<_>>()
        .join("\n")
}
