//! File-based send log: the whole history in one JSON file.
//! Keyed by lead id so a lookup never scans other leads' events.
//! Human-readable; rewritten wholesale on every append.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use legions_core::error::{LegionsError, Result};
use legions_core::traits::SendLog;
use legions_core::types::SendEvent;

type EventIndex = BTreeMap<String, Vec<SendEvent>>;

/// JSON-file backed [`SendLog`].
pub struct JsonSendLog {
    path: PathBuf,
    index: Mutex<EventIndex>,
}

impl JsonSendLog {
    /// Open the log at `path`. A missing file is an empty log; an unreadable
    /// or corrupt one is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let index = if path.exists() {
            let json = std::fs::read_to_string(path)
                .map_err(|e| LegionsError::storage(format!("Read {}: {e}", path.display())))?;
            let mut index: EventIndex = serde_json::from_str(&json)
                .map_err(|e| LegionsError::storage(format!("Parse {}: {e}", path.display())))?;
            for events in index.values_mut() {
                events.sort_by_key(|e| e.sent_at);
            }
            index
        } else {
            EventIndex::new()
        };

        tracing::debug!(
            "📂 Loaded send log for {} leads from {}",
            index.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            index: Mutex::new(index),
        })
    }

    /// Default log path (~/.legions/emails-sent.json).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".legions").join("emails-sent.json")
    }

    /// Number of leads with at least one event.
    pub fn lead_count(&self) -> usize {
        self.index.lock().map(|i| i.len()).unwrap_or(0)
    }

    fn save(&self, index: &EventIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(index)?;
        // Write-then-rename so a crash never leaves a truncated log behind.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| LegionsError::storage(format!("Write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| LegionsError::storage(format!("Rename {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl SendLog for JsonSendLog {
    fn history(&self, lead_id: &str) -> Result<Vec<SendEvent>> {
        let index = self
            .index
            .lock()
            .map_err(|e| LegionsError::storage(format!("Lock: {e}")))?;
        Ok(index.get(lead_id).cloned().unwrap_or_default())
    }

    fn append(&self, event: &SendEvent) -> Result<()> {
        let mut index = self
            .index
            .lock()
            .map_err(|e| LegionsError::storage(format!("Lock: {e}")))?;
        let events = index.entry(event.lead_id.clone()).or_default();
        let pos = events.partition_point(|e| e.sent_at <= event.sent_at);
        events.insert(pos, event.clone());

        if let Err(e) = self.save(&index) {
            // Keep memory consistent with disk.
            if let Some(events) = index.get_mut(&event.lead_id) {
                events.retain(|e| e.id != event.id);
            }
            return Err(e);
        }
        tracing::debug!("💾 Recorded {} for {}", event.label, event.lead_id);
        Ok(())
    }
}
