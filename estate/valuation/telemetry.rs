use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use estate_journal::{JournalEntry, JournalLevel, JournalSink, JsonlJournal};
use serde_json::Value;

/// Builder for [`ValuationTelemetry`].
pub struct ValuationTelemetryBuilder {
    component: String,
    journal_path: Option<PathBuf>,
    sink: Option<Arc<dyn JournalSink>>,
}

impl ValuationTelemetryBuilder {
    /// Starts a builder for `component`.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            journal_path: None,
            sink: None,
        }
    }

    /// Journals to a JSON-lines file.
    #[must_use]
    pub fn journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    /// Journals to an existing sink. Takes precedence over `journal_path`.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn JournalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Opens the journal (if any) and returns the handle.
    pub fn build(self) -> Result<ValuationTelemetry> {
        let sink = match (self.sink, self.journal_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonlJournal::open(path)?) as Arc<dyn JournalSink>),
            (None, None) => None,
        };
        Ok(ValuationTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                sink,
            }),
        })
    }
}

/// Cloneable handle emitting every event to `tracing` and, when configured, the run journal.
#[derive(Clone)]
pub struct ValuationTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    component: String,
    sink: Option<Arc<dyn JournalSink>>,
}

impl fmt::Debug for ValuationTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuationTelemetry")
            .field("component", &self.inner.component)
            .field("journal", &self.inner.sink.is_some())
            .finish()
    }
}

impl ValuationTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> ValuationTelemetryBuilder {
        ValuationTelemetryBuilder::new(component)
    }

    /// Tracing-only handle.
    #[must_use]
    pub fn tracing_only(component: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                component: component.into(),
                sink: None,
            }),
        }
    }

    /// Same sink, different component name.
    #[must_use]
    pub fn scoped(&self, component: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                component: component.into(),
                sink: self.inner.sink.clone(),
            }),
        }
    }

    /// Component name stamped on entries.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.inner.component
    }

    /// Records an event. Journal failures are reported through `tracing` and swallowed.
    pub fn emit(&self, level: JournalLevel, event: &str, fields: Value) {
        let component = self.inner.component.as_str();
        match level {
            JournalLevel::Debug => tracing::debug!(component, event, %fields),
            JournalLevel::Info => tracing::info!(component, event, %fields),
            JournalLevel::Warn => tracing::warn!(component, event, %fields),
            JournalLevel::Error => tracing::error!(component, event, %fields),
        }
        if let Some(sink) = &self.inner.sink {
            let entry = JournalEntry::new(component, level, event).with_fields(fields);
            if let Err(err) = sink.record(&entry) {
                tracing::warn!(component, event, error = %err, "journal write failed");
            }
        }
    }

    /// Info-level shorthand.
    pub fn info(&self, event: &str, fields: Value) {
        self.emit(JournalLevel::Info, event, fields);
    }

    /// Warn-level shorthand.
    pub fn warn(&self, event: &str, fields: Value) {
        self.emit(JournalLevel::Warn, event, fields);
    }
}

impl Default for ValuationTelemetry {
    fn default() -> Self {
        Self::tracing_only("valuation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_journal::{JournalReader, MemoryJournal};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn events_reach_the_file_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let telemetry = ValuationTelemetry::builder("training")
            .journal_path(&path)
            .build()
            .unwrap();
        telemetry.info("training.completed", json!({ "rmse": 70_000.0 }));
        let entries = JournalReader::new(&path).tail(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].component, "training");
        assert_eq!(entries[0].field("rmse"), Some(&json!(70_000.0)));
    }

    #[test]
    fn scoped_handles_share_the_sink() {
        let journal = Arc::new(MemoryJournal::new());
        let telemetry = ValuationTelemetry::builder("training")
            .sink(journal.clone())
            .build()
            .unwrap();
        telemetry.scoped("sweep").warn("sweep.trial_failed", json!({ "trial": 3 }));
        let entries = journal.entries();
        assert_eq!(entries[0].component, "sweep");
        assert_eq!(entries[0].level, JournalLevel::Warn);
    }

    #[test]
    fn tracing_only_handle_is_silent() {
        let telemetry = ValuationTelemetry::default();
        telemetry.info("noop", Value::Null);
        assert_eq!(telemetry.component(), "valuation");
    }
}
