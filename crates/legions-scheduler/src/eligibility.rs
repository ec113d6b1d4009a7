//! Send eligibility: decides the single next action for one lead.
//!
//! The decision is a pure function of the lead's ordered send history, its
//! suppression flags, the current time and the follow-up cadence.
//!
//! A due follow-up may only fire inside a one-day window starting at its
//! delay. If no run happens inside that window the step is skipped for good
//! (`window_missed`) rather than sent late.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use legions_core::types::{
    FollowUpConfig, SendEvent, SequenceLabel, SuppressionFlags, SuppressionKind,
};

const SECS_PER_DAY: f64 = 86_400.0;

/// Why no email is due.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HoldReason {
    /// Replied, bounced or unsubscribed. Permanent.
    Suppressed { by: SuppressionKind },
    /// Every configured follow-up has been sent.
    Exhausted,
    /// The next follow-up fires at `due_at`.
    NotYetDue { due_at: DateTime<Utc> },
    /// The firing window closed before any run picked the step up.
    WindowMissed { closed_at: DateTime<Utc> },
    /// Labels are out of sequence; the lead is held for inspection.
    InconsistentHistory,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldReason::Suppressed { .. } => "suppressed",
            HoldReason::Exhausted => "exhausted",
            HoldReason::NotYetDue { .. } => "not_yet_due",
            HoldReason::WindowMissed { .. } => "window_missed",
            HoldReason::InconsistentHistory => "inconsistent_history",
        }
    }
}

/// Next action for a lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    SendInitial,
    #[serde(rename = "send_followup")]
    SendFollowUp { sequence_index: usize },
    #[serde(rename = "none")]
    Hold { reason: HoldReason },
}

impl Decision {
    /// Label of the email this decision sends, if any.
    pub fn label(&self) -> Option<SequenceLabel> {
        match self {
            Decision::SendInitial => Some(SequenceLabel::Initial),
            Decision::SendFollowUp { sequence_index } => {
                SequenceLabel::for_follow_up(*sequence_index)
            }
            Decision::Hold { .. } => None,
        }
    }

    fn hold(reason: HoldReason) -> Self {
        Decision::Hold { reason }
    }
}

/// Fractional days between two instants.
pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY
}

/// Decide the next action for one lead.
///
/// `history` must be ordered by `sent_at` (the send log guarantees this).
pub fn evaluate(
    history: &[SendEvent],
    flags: SuppressionFlags,
    now: DateTime<Utc>,
    config: &FollowUpConfig,
) -> Decision {
    if let Some(by) = flags.kind() {
        return Decision::hold(HoldReason::Suppressed { by });
    }

    let Some(last) = history.last() else {
        return Decision::SendInitial;
    };

    let in_sequence = history
        .iter()
        .enumerate()
        .all(|(i, ev)| SequenceLabel::at(i) == Some(ev.label));
    if !in_sequence {
        tracing::warn!(
            "⚠️ Lead {} has an out-of-sequence history ({} events), holding",
            last.lead_id,
            history.len()
        );
        return Decision::hold(HoldReason::InconsistentHistory);
    }

    // Everything after the initial email is a follow-up.
    let sent_follow_ups = history.len() - 1;
    let Some(delay) = config.delay_for(sent_follow_ups) else {
        return Decision::hold(HoldReason::Exhausted);
    };

    let opens_at = last.sent_at + Duration::days(i64::from(delay));
    let closes_at = opens_at + Duration::days(1);
    let elapsed = elapsed_days(last.sent_at, now);
    let delay = f64::from(delay);

    if elapsed < delay {
        Decision::hold(HoldReason::NotYetDue { due_at: opens_at })
    } else if elapsed < delay + 1.0 {
        Decision::SendFollowUp { sequence_index: sent_follow_ups }
    } else {
        Decision::hold(HoldReason::WindowMissed { closed_at: closes_at })
    }
}
