//! Run summary: what one pipeline run did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use legions_core::types::SequenceLabel;

/// Lead addresses contacted, per stage of the sequence, in send order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentByStage {
    pub initial: Vec<String>,
    pub followup1: Vec<String>,
    pub followup2: Vec<String>,
    pub breakup: Vec<String>,
}

impl SentByStage {
    pub fn record(&mut self, label: SequenceLabel, lead: &str) {
        self.stage_mut(label).push(lead.to_string());
    }

    pub fn stage(&self, label: SequenceLabel) -> &[String] {
        match label {
            SequenceLabel::Initial => &self.initial,
            SequenceLabel::Followup1 => &self.followup1,
            SequenceLabel::Followup2 => &self.followup2,
            SequenceLabel::Breakup => &self.breakup,
        }
    }

    fn stage_mut(&mut self, label: SequenceLabel) -> &mut Vec<String> {
        match label {
            SequenceLabel::Initial => &mut self.initial,
            SequenceLabel::Followup1 => &mut self.followup1,
            SequenceLabel::Followup2 => &mut self.followup2,
            SequenceLabel::Breakup => &mut self.breakup,
        }
    }

    pub fn total(&self) -> usize {
        self.initial.len() + self.followup1.len() + self.followup2.len() + self.breakup.len()
    }
}

/// A per-lead dispatch failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchError {
    /// Lead email address.
    pub lead: String,
    pub error: String,
}

/// Outcome of one run. Per-lead problems live here; run-level failures are
/// returned as errors instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sent: SentByStage,
    /// Leads with nothing to send plus eligible sends deferred by the gate.
    pub skipped: u32,
    pub errors: Vec<DispatchError>,
    /// Earliest moment a deferred send becomes possible again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_send_time: Option<DateTime<Utc>>,
    pub content_fallbacks: u32,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run, ..Default::default() }
    }

    pub fn record_sent(&mut self, label: SequenceLabel, lead: &str) {
        self.sent.record(label, lead);
    }

    pub fn record_error(&mut self, lead: &str, error: impl Into<String>) {
        self.errors.push(DispatchError {
            lead: lead.to_string(),
            error: error.into(),
        });
    }

    pub fn add_skipped(&mut self, n: usize) {
        self.skipped = self.skipped.saturating_add(u32::try_from(n).unwrap_or(u32::MAX));
    }

    /// Keep the earliest of the current and the offered time.
    pub fn offer_next_send_time(&mut self, at: DateTime<Utc>) {
        self.next_send_time = Some(match self.next_send_time {
            Some(current) => current.min(at),
            None => at,
        });
    }

    pub fn total_sent(&self) -> usize {
        self.sent.total()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// One-screen plain-text rendering for terminals and notifications.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{}sent {} (initial {}, followup1 {}, followup2 {}, breakup {}), skipped {}, fallbacks {}, errors {}",
            if self.dry_run { "[dry run] " } else { "" },
            self.total_sent(),
            self.sent.initial.len(),
            self.sent.followup1.len(),
            self.sent.followup2.len(),
            self.sent.breakup.len(),
            self.skipped,
            self.content_fallbacks,
            self.errors.len(),
        );
        if let Some(next) = self.next_send_time {
            out.push_str(&format!("\nnext send window: {}", next.to_rfc3339()));
        }
        for e in &self.errors {
            out.push_str(&format!("\n  ✗ {}: {}", e.lead, e.error));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_by_stage() {
        let mut summary = RunSummary::new(false);
        summary.record_sent(SequenceLabel::Initial, "a@acme.io");
        summary.record_sent(SequenceLabel::Initial, "b@acme.io");
        summary.record_sent(SequenceLabel::Breakup, "c@acme.io");
        assert_eq!(summary.sent.initial, vec!["a@acme.io", "b@acme.io"]);
        assert_eq!(summary.sent.stage(SequenceLabel::Breakup), ["c@acme.io".to_string()]);
        assert_eq!(summary.total_sent(), 3);
        assert!(summary.render().starts_with("sent 3 (initial 2, followup1 0, followup2 0, breakup 1)"));
    }

    #[test]
    fn test_skipped_saturates() {
        let mut summary = RunSummary::default();
        summary.add_skipped(7);
        summary.add_skipped(usize::MAX);
        assert_eq!(summary.skipped, u32::MAX);
    }

    #[test]
    fn test_next_send_time_keeps_earliest() {
        let mut summary = RunSummary::default();
        let late = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap();
        summary.offer_next_send_time(late);
        summary.offer_next_send_time(early);
        summary.offer_next_send_time(late);
        assert_eq!(summary.next_send_time, Some(early));
    }

    #[test]
    fn test_json_shape() {
        let mut summary = RunSummary::new(true);
        summary.record_sent(SequenceLabel::Followup1, "ana@acme.io");
        summary.record_error("bo@acme.io", "550 mailbox unavailable");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["sent"]["followup1"], serde_json::json!(["ana@acme.io"]));
        assert_eq!(json["sent"]["initial"], serde_json::json!([]));
        assert_eq!(json["errors"][0]["lead"], "bo@acme.io");
        assert_eq!(json["dry_run"], true);
        assert!(json.get("next_send_time").is_none());
    }

    #[test]
    fn test_render_lists_errors() {
        let mut summary = RunSummary::new(false);
        summary.record_error("bo@acme.io", "timeout");
        let text = summary.render();
        assert!(text.contains("errors 1"));
        assert!(text.contains("bo@acme.io: timeout"));
    }
}
