//! Run notifications: turns a run outcome into a message for the operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::summary::RunSummary;

/// A notification to send to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    /// What produced it, e.g. "legions run".
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Normal,
    High,
    Urgent,
}

impl NotifyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyPriority::Normal => "normal",
            NotifyPriority::High => "high",
            NotifyPriority::Urgent => "urgent",
        }
    }
}

impl Notification {
    pub fn new(title: &str, body: &str, source: &str, priority: NotifyPriority) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Completed run. Per-lead errors raise the priority to high.
    pub fn for_summary(summary: &RunSummary) -> Self {
        let (title, priority) = if summary.has_errors() {
            (
                format!("Legions run finished with {} error(s)", summary.errors.len()),
                NotifyPriority::High,
            )
        } else if summary.dry_run {
            ("Legions dry run finished".to_string(), NotifyPriority::Normal)
        } else {
            (
                format!("Legions run sent {} email(s)", summary.total_sent()),
                NotifyPriority::Normal,
            )
        };
        Self::new(&title, &summary.render(), "legions run", priority)
    }

    /// Aborted run.
    pub fn for_failure(error: &str) -> Self {
        Self::new("Legions run aborted", error, "legions run", NotifyPriority::Urgent)
    }
}

/// Skip quiet runs: nothing sent, nothing failed.
pub fn worth_sending(summary: &RunSummary) -> bool {
    summary.total_sent() > 0 || summary.has_errors()
}
