//! Rate/window gate: turns eligible actions into a capacity-bounded plan.
//!
//! Pure: no storage, no clock. The caller passes `now` and the client's
//! [`RateState`] and persists the returned state.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use legions_core::types::{BusinessHours, Lead, RateState, SequenceLabel};

/// One eligible send discovered for a lead.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub lead: Lead,
    pub label: SequenceLabel,
}

impl Candidate {
    pub fn new(lead: Lead, label: SequenceLabel) -> Self {
        Self { lead, label }
    }
}

/// Ordered, capacity-bounded sends for one client.
#[derive(Debug, Clone, Default)]
pub struct SendPlan {
    pub actions: Vec<Candidate>,
    /// True when the business-hours window is closed and nothing was planned.
    pub skipped: bool,
    /// Next window opening, set when `skipped`.
    pub next_window: Option<DateTime<Utc>>,
    /// Eligible candidates left out (closed window or cap reached).
    pub deferred: usize,
}

/// Whether sending is permitted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowCheck {
    Open,
    Closed { next_window: DateTime<Utc> },
}

/// Resolve an IANA zone name. `None` means UTC; an unknown name is `Err`.
pub fn resolve_timezone(name: Option<&str>) -> Result<Tz, String> {
    match name {
        None => Ok(Tz::UTC),
        Some(n) => n.parse::<Tz>().map_err(|e| e.to_string()),
    }
}

/// The client-local calendar day used for daily caps. Falls back to the UTC
/// day when the timezone cannot be resolved.
pub fn local_day(hours: &BusinessHours, now: DateTime<Utc>) -> NaiveDate {
    match resolve_timezone(hours.timezone.as_deref()) {
        Ok(tz) => now.with_timezone(&tz).date_naive(),
        Err(_) => now.date_naive(),
    }
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Check the business-hours window.
///
/// An unresolvable timezone leaves the window open: a typo in a client's
/// settings must not stop the whole run.
pub fn check_window(hours: &BusinessHours, now: DateTime<Utc>) -> WindowCheck {
    if !hours.enabled {
        return WindowCheck::Open;
    }

    let tz = match resolve_timezone(hours.timezone.as_deref()) {
        Ok(tz) => tz,
        Err(e) => {
            tracing::warn!(
                "⚠️ Unknown timezone {:?} ({e}), sending without business-hours gate",
                hours.timezone
            );
            return WindowCheck::Open;
        }
    };

    let local = now.with_timezone(&tz);
    let hour = local.hour();
    let day_ok = !(hours.skip_weekends && is_weekend(local.date_naive()));

    if day_ok && hour >= hours.start_hour && hour < hours.end_hour {
        return WindowCheck::Open;
    }

    WindowCheck::Closed {
        next_window: next_window_start(tz, local.date_naive(), hour, hours, now),
    }
}

fn next_window_start(
    tz: Tz,
    today: NaiveDate,
    hour: u32,
    hours: &BusinessHours,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let allowed = |d: NaiveDate| !(hours.skip_weekends && is_weekend(d));

    let mut day = if hour < hours.start_hour && allowed(today) {
        today
    } else {
        today + Duration::days(1)
    };
    while !allowed(day) {
        day += Duration::days(1);
    }

    let Some(start) = day.and_hms_opt(hours.start_hour, 0, 0) else {
        return now + Duration::hours(1);
    };

    // A DST gap can swallow the start hour; the first valid instant after it wins.
    tz.from_local_datetime(&start)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(start + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(1))
}

/// When a client whose cap is used up can send again: the next local
/// midnight, pushed to the window start when business hours apply.
pub fn cap_resets_at(hours: &BusinessHours, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = resolve_timezone(hours.timezone.as_deref()).unwrap_or(Tz::UTC);
    let tomorrow = now.with_timezone(&tz).date_naive() + Duration::days(1);
    let midnight = tomorrow
        .and_hms_opt(0, 0, 0)
        .and_then(|m| tz.from_local_datetime(&m).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::days(1));

    match check_window(hours, midnight) {
        WindowCheck::Open => midnight,
        WindowCheck::Closed { next_window } => next_window,
    }
}

/// Build the send plan for one client.
///
/// Follow-ups go first (they follow up on a conversation already started),
/// then initials; discovery order is kept within each group. At most
/// `daily_cap - sent_today` actions are planned.
pub fn plan(
    candidates: Vec<Candidate>,
    daily_cap: u32,
    hours: &BusinessHours,
    state: RateState,
    now: DateTime<Utc>,
) -> (SendPlan, RateState) {
    let state = state.rolled(local_day(hours, now));
    let total = candidates.len();

    if let WindowCheck::Closed { next_window } = check_window(hours, now) {
        return (
            SendPlan {
                actions: Vec::new(),
                skipped: true,
                next_window: Some(next_window),
                deferred: total,
            },
            state,
        );
    }

    let (mut actions, initials): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.label.is_follow_up());
    actions.extend(initials);

    let remaining = state.remaining(daily_cap) as usize;
    actions.truncate(remaining);

    let deferred = total - actions.len();
    (
        SendPlan {
            actions,
            skipped: false,
            next_window: None,
            deferred,
        },
        state,
    )
}
