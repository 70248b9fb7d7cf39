#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Append-only JSON-lines journal recording training runs, sweeps, and predictions.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity attached to a journal entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum JournalLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal lifecycle events.
    Info,
    /// Degraded but recoverable situations.
    Warn,
    /// Failed operations.
    Error,
}

/// Single structured journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Time the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Component that produced the entry (e.g. `training`, `sweep`).
    pub component: String,
    /// Severity.
    pub level: JournalLevel,
    /// Dotted event name such as `training.completed`.
    pub event: String,
    /// Event fields (metrics, identifiers, hyperparameters).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl JournalEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(component: impl Into<String>, level: JournalLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.into(),
            level,
            event: event.into(),
            fields: Map::new(),
        }
    }

    /// Attaches the object members of `fields`; non-object values are stored under `value`.
    #[must_use]
    pub fn with_fields(mut self, fields: Value) -> Self {
        match fields {
            Value::Object(map) => self.fields = map,
            Value::Null => {}
            other => {
                self.fields.insert("value".into(), other);
            }
        }
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Destination for journal entries.
pub trait JournalSink: Send + Sync {
    /// Records one entry.
    fn record(&self, entry: &JournalEntry) -> Result<()>;
}

/// File-backed sink writing one JSON document per line.
#[derive(Debug)]
pub struct JsonlJournal {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonlJournal {
    /// Opens (or creates) the journal file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating journal dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Location of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a reader over the same file.
    #[must_use]
    pub fn reader(&self) -> JournalReader {
        JournalReader::new(&self.path)
    }
}

impl JournalSink for JsonlJournal {
    fn record(&self, entry: &JournalEntry) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// In-memory sink, handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every recorded entry.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Entries whose event name matches exactly.
    #[must_use]
    pub fn events(&self, event: &str) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.event == event)
            .cloned()
            .collect()
    }
}

impl JournalSink for MemoryJournal {
    fn record(&self, entry: &JournalEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Reads entries back from a JSON-lines journal file.
#[derive(Debug, Clone)]
pub struct JournalReader {
    path: PathBuf,
}

impl JournalReader {
    /// Creates a reader for `path`; a missing file reads as empty.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The newest `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let mut entries = self.read_all()?;
        if entries.len() > limit {
            entries.drain(0..entries.len() - limit);
        }
        Ok(entries)
    }

    /// Entries recorded at or after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> Result<Vec<JournalEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.timestamp >= since)
            .collect())
    }

    fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("opening journal {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str::<JournalEntry>(&line)
                .with_context(|| format!("journal line {} is not a valid entry", line_no + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn jsonl_journal_appends_and_reads_back() {
        let dir = tempdir().unwrap();
        let journal = JsonlJournal::open(dir.path().join("runs/journal.jsonl")).unwrap();
        for run in 0..3 {
            let entry = JournalEntry::new("training", JournalLevel::Info, "training.completed")
                .with_fields(json!({ "run": run, "rmse": 70_000.0 }));
            journal.record(&entry).unwrap();
        }
        let tail = journal.reader().tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].field("run"), Some(&json!(1)));
        assert_eq!(tail[1].field("run"), Some(&json!(2)));
    }

    #[test]
    fn missing_journal_reads_empty() {
        let dir = tempdir().unwrap();
        let reader = JournalReader::new(dir.path().join("absent.jsonl"));
        assert!(reader.tail(10).unwrap().is_empty());
    }

    #[test]
    fn since_filters_older_entries() {
        let dir = tempdir().unwrap();
        let journal = JsonlJournal::open(dir.path().join("journal.jsonl")).unwrap();
        let mut old = JournalEntry::new("sweep", JournalLevel::Debug, "sweep.trial");
        old.timestamp = Utc::now() - chrono::Duration::hours(1);
        journal.record(&old).unwrap();
        let cutoff = Utc::now() - chrono::Duration::minutes(1);
        journal
            .record(&JournalEntry::new("sweep", JournalLevel::Info, "sweep.completed"))
            .unwrap();
        let recent = journal.reader().since(cutoff).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event, "sweep.completed");
    }

    #[test]
    fn scalar_fields_are_wrapped() {
        let entry = JournalEntry::new("prediction", JournalLevel::Warn, "prediction.rejected")
            .with_fields(json!("bad input"));
        assert_eq!(entry.field("value"), Some(&json!("bad input")));
    }

    #[test]
    fn memory_journal_filters_by_event() {
        let journal = MemoryJournal::new();
        journal
            .record(&JournalEntry::new("a", JournalLevel::Info, "x"))
            .unwrap();
        journal
            .record(&JournalEntry::new("a", JournalLevel::Info, "y"))
            .unwrap();
        assert_eq!(journal.entries().len(), 2);
        assert_eq!(journal.events("y").len(), 1);
    }
}
