//! Send pipeline: one batch run over every active client.
//!
//! ```text
//! clients → active campaigns → leads
//!   └── history + suppression → eligibility → candidates
//! candidates → gate (cap, window) → executor → rate state saved
//! ```
//!
//! Clients are processed one after another; the only waits are pacing
//! sleeps and collaborator I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};

use legions_core::config::LegionsConfig;
use legions_core::error::Result;
use legions_core::traits::{
    ContentGenerator, LeadBook, MailTransport, RateStore, SendLog, SuppressionSource,
};
use legions_core::types::{
    BusinessHours, Client, FollowUpConfig, Lead, RateState, SendEvent, SuppressionFlags,
};

use crate::eligibility::{self, Decision};
use crate::executor::{Pacing, SendExecutor};
use crate::gate::{self, Candidate};
use crate::lease::RunLease;
use crate::summary::RunSummary;

/// Everything a run talks to.
pub struct Collaborators<'a> {
    pub book: &'a dyn LeadBook,
    pub log: &'a dyn SendLog,
    pub suppression: &'a dyn SuppressionSource,
    pub rates: &'a dyn RateStore,
    pub generator: &'a dyn ContentGenerator,
    pub transport: &'a dyn MailTransport,
    /// Held run lease, renewed before every dispatch. `None` for dry runs.
    pub lease: Option<&'a RunLease<'a>>,
}

/// Per-invocation settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub follow_up: FollowUpConfig,
    /// Cap for clients without their own.
    pub default_daily_cap: u32,
    pub jitter_secs: u64,
    pub dispatch_timeout: Duration,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            follow_up: FollowUpConfig::default(),
            default_daily_cap: 50,
            jitter_secs: 0,
            dispatch_timeout: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &LegionsConfig, dry_run: bool) -> Self {
        Self {
            follow_up: config.follow_up.clone(),
            default_daily_cap: config.sending.default_daily_cap,
            jitter_secs: config.sending.jitter_secs,
            dispatch_timeout: Duration::from_secs(config.sending.dispatch_timeout_secs),
            dry_run,
        }
    }

    fn pacing(&self) -> Pacing {
        Pacing::new(self.follow_up.min_send_interval_secs, self.jitter_secs)
    }
}

/// Business-hours policy actually applied to a client: its own, forced on
/// by `business_hours_only`, with the run timezone filling a missing zone.
pub fn effective_hours(client: &Client, follow_up: &FollowUpConfig) -> BusinessHours {
    let mut hours = client.business_hours.clone();
    hours.enabled = hours.enabled || follow_up.business_hours_only;
    if hours.timezone.is_none() {
        hours.timezone = follow_up.timezone.clone();
    }
    hours
}

/// Current state of one lead, for inspection.
#[derive(Debug, Clone)]
pub struct LeadReport {
    pub lead: Lead,
    pub history: Vec<SendEvent>,
    pub flags: SuppressionFlags,
    pub decision: Decision,
}

/// Replay a lead's history and decide what would happen now.
pub fn inspect_lead(
    log: &dyn SendLog,
    suppression: &dyn SuppressionSource,
    lead: Lead,
    follow_up: &FollowUpConfig,
    now: DateTime<Utc>,
) -> Result<LeadReport> {
    let history = log.history(&lead.id)?;
    let flags = suppression.flags(&lead)?;
    let decision = eligibility::evaluate(&history, flags, now, follow_up);
    Ok(LeadReport { lead, history, flags, decision })
}

/// Execute one run. Per-lead problems end up in the summary; any error
/// returned here aborts the run.
pub async fn run(
    c: &Collaborators<'_>,
    options: &RunOptions,
    now: DateTime<Utc>,
) -> Result<RunSummary> {
    let mut summary = RunSummary::new(options.dry_run);
    let mut executor = SendExecutor::new(c.generator, c.transport, c.log, c.book)
        .with_pacing(options.pacing())
        .with_dispatch_timeout(options.dispatch_timeout)
        .with_lease(c.lease)
        .dry_run(options.dry_run);
    if !options.dry_run {
        executor = executor.with_rate_store(c.rates);
    }

    let clients = c.book.active_clients()?;
    tracing::info!(
        "🚀 Run started: {} active client(s){}",
        clients.len(),
        if options.dry_run { " [dry run]" } else { "" }
    );

    for client in &clients {
        let candidates = collect_candidates(c, client, &options.follow_up, now, &mut summary)?;

        let hours = effective_hours(client, &options.follow_up);
        let cap = client.daily_cap.unwrap_or(options.default_daily_cap);
        let stored = c.rates.load_rate(&client.id)?;
        let state = stored.unwrap_or_else(|| RateState::new(gate::local_day(&hours, now)));

        let eligible = candidates.len();
        let (plan, mut state) = gate::plan(candidates, cap, &hours, state, now);

        summary.add_skipped(plan.deferred);
        if let Some(next) = plan.next_window {
            tracing::info!(
                "🌙 {}: outside business hours, {} send(s) wait until {}",
                client.name,
                plan.deferred,
                next
            );
            summary.offer_next_send_time(next);
        } else if plan.deferred > 0 {
            let reset = gate::cap_resets_at(&hours, now);
            tracing::info!(
                "🧮 {}: daily cap {} reached, {} send(s) deferred until {}",
                client.name,
                cap,
                plan.deferred,
                reset
            );
            summary.offer_next_send_time(reset);
        }

        if !plan.actions.is_empty() {
            tracing::info!(
                "📋 {}: {} eligible, {} planned ({} of {} sent today)",
                client.name,
                eligible,
                plan.actions.len(),
                state.sent_today,
                cap
            );
        }

        // Sends are saved by the executor as they go out; this covers a day
        // rollover with nothing sent.
        executor.execute(client, &plan, &mut state, &mut summary).await?;

        if !options.dry_run && stored != Some(state) {
            c.rates.save_rate(&client.id, &state)?;
        }
    }

    tracing::info!("🏁 Run finished: {}", summary.render().replace('\n', " | "));
    Ok(summary)
}

fn collect_candidates(
    c: &Collaborators<'_>,
    client: &Client,
    follow_up: &FollowUpConfig,
    now: DateTime<Utc>,
    summary: &mut RunSummary,
) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();

    for campaign in c.book.active_campaigns(&client.id)? {
        for lead in c.book.leads(&campaign.id)? {
            let history = c.log.history(&lead.id)?;
            let flags = c.suppression.flags(&lead)?;
            let decision = eligibility::evaluate(&history, flags, now, follow_up);

            match decision.label() {
                Some(label) => candidates.push(Candidate::new(lead, label)),
                None => {
                    if let Decision::Hold { reason } = &decision {
                        tracing::debug!("⏸️ {} held: {}", lead.email, reason.as_str());
                    }
                    summary.add_skipped(1);
                }
            }
        }
    }
    Ok(candidates)
}
