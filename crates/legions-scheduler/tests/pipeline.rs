//! End-to-end runs over an in-memory database with fake content and mail.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use legions_core::error::{LegionsError, Result};
use legions_core::traits::{ContentGenerator, LeadBook, MailTransport, RateStore, SendLog};
use legions_core::types::{
    BusinessHours, Campaign, CampaignStatus, Client, DispatchOutcome, EmailContent, Lead,
    LeadStatus, OutboundEmail, SendEvent, SenderIdentity, SequenceLabel, SuppressionKind,
};
use legions_scheduler::pipeline::{self, Collaborators, RunOptions};
use legions_scheduler::{JsonSendLog, OutreachDb};

// ─── Fakes ────────────────────────────────────────────────────

struct FakeWriter {
    fail: bool,
}

#[async_trait]
impl ContentGenerator for FakeWriter {
    fn name(&self) -> &str {
        "fake-writer"
    }

    async fn generate(&self, lead: &Lead, _: &Client, label: SequenceLabel) -> Result<EmailContent> {
        if self.fail {
            return Err(LegionsError::provider("503 upstream overloaded"));
        }
        Ok(EmailContent {
            subject: format!("{label}: hello {}", lead.first_name()),
            body: "Generated body".into(),
        })
    }
}

#[derive(Default)]
struct FakeMailer {
    bounce: Vec<String>,
    outbox: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl MailTransport for FakeMailer {
    fn name(&self) -> &str {
        "fake-mailer"
    }

    async fn send(&self, email: &OutboundEmail) -> DispatchOutcome {
        self.outbox.lock().unwrap().push(email.clone());
        if self.bounce.contains(&email.to) {
            DispatchOutcome::failed("550 5.1.1 user unknown")
        } else {
            DispatchOutcome::sent(Some(format!("<{}@fake>", uuid::Uuid::new_v4())))
        }
    }
}

/// Send log over the database that refuses every append after the first `keep`.
struct FailingLog<'a> {
    db: &'a OutreachDb,
    keep: usize,
    appended: AtomicUsize,
}

impl SendLog for FailingLog<'_> {
    fn history(&self, lead_id: &str) -> Result<Vec<SendEvent>> {
        self.db.history(lead_id)
    }

    fn append(&self, event: &SendEvent) -> Result<()> {
        if self.appended.fetch_add(1, Ordering::SeqCst) >= self.keep {
            return Err(LegionsError::storage("database is locked"));
        }
        self.db.append(event)
    }
}

impl FakeMailer {
    fn sent_to(&self) -> Vec<String> {
        self.outbox.lock().unwrap().iter().map(|e| e.to.clone()).collect()
    }
}

// ─── Fixtures ─────────────────────────────────────────────────

fn seed(db: &OutreachDb, cap: Option<u32>, hours: BusinessHours, emails: &[&str]) -> Vec<Lead> {
    db.upsert_client(&Client {
        id: "acme".into(),
        name: "Acme Growth".into(),
        active: true,
        sender: SenderIdentity {
            email: "rep@acmegrowth.io".into(),
            name: Some("Rita Rep".into()),
            reply_to: None,
        },
        daily_cap: cap,
        business_hours: hours,
    })
    .unwrap();
    db.upsert_campaign(&Campaign {
        id: "acme-q3".into(),
        client_id: "acme".into(),
        name: "Q3".into(),
        status: CampaignStatus::Active,
        targeting: Default::default(),
        created_at: Utc::now(),
    })
    .unwrap();

    emails
        .iter()
        .map(|email| {
            let mut lead = Lead::new("acme-q3", email);
            lead.name = Some("Ana Ruiz".into());
            db.upsert_lead(&lead).unwrap();
            lead
        })
        .collect()
}

fn sent_event(lead: &Lead, label: SequenceLabel, at: DateTime<Utc>) -> SendEvent {
    SendEvent {
        id: uuid::Uuid::new_v4().to_string(),
        lead_id: lead.id.clone(),
        campaign_id: lead.campaign_id.clone(),
        label,
        sent_at: at,
        message_id: None,
        payload: serde_json::Value::Null,
    }
}

fn days_ago(days: f64) -> DateTime<Utc> {
    Utc::now() - Duration::milliseconds((days * 86_400_000.0) as i64)
}

fn options() -> RunOptions {
    let mut options = RunOptions::default();
    options.follow_up.min_send_interval_secs = 0;
    options
}

fn collaborators<'a>(
    db: &'a OutreachDb,
    log: &'a dyn SendLog,
    writer: &'a FakeWriter,
    mailer: &'a FakeMailer,
) -> Collaborators<'a> {
    Collaborators {
        book: db,
        log,
        suppression: db,
        rates: db,
        generator: writer,
        transport: mailer,
        lease: None,
    }
}

// ─── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn test_two_immediate_runs_send_once() {
    let db = OutreachDb::open_in_memory().unwrap();
    let leads = seed(&db, None, BusinessHours::default(), &["a@p.io", "b@p.io", "c@p.io"]);
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let first = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(first.sent.initial, vec!["a@p.io", "b@p.io", "c@p.io"]);
    assert!(first.errors.is_empty());

    let second = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(second.total_sent(), 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(mailer.sent_to().len(), 3);

    for lead in &leads {
        assert_eq!(db.history(&lead.id).unwrap().len(), 1);
    }
    assert!(db.leads("acme-q3").unwrap().iter().all(|l| l.status == LeadStatus::Contacted));
}

#[tokio::test]
async fn test_follow_up_fires_at_three_point_two_days() {
    let db = OutreachDb::open_in_memory().unwrap();
    let leads = seed(&db, None, BusinessHours::default(), &["due@p.io", "late@p.io", "early@p.io"]);
    db.append(&sent_event(&leads[0], SequenceLabel::Initial, days_ago(3.2))).unwrap();
    db.append(&sent_event(&leads[1], SequenceLabel::Initial, days_ago(4.5))).unwrap();
    db.append(&sent_event(&leads[2], SequenceLabel::Initial, days_ago(1.0))).unwrap();

    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let summary = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(summary.sent.followup1, vec!["due@p.io"]);
    assert!(summary.sent.initial.is_empty());
    assert_eq!(summary.skipped, 2);
    assert_eq!(mailer.sent_to(), vec!["due@p.io".to_string()]);

    let labels: Vec<_> = db.history(&leads[0].id).unwrap().iter().map(|e| e.label).collect();
    assert_eq!(labels, vec![SequenceLabel::Initial, SequenceLabel::Followup1]);
    // Missed window is never caught up.
    assert_eq!(db.history(&leads[1].id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_content_failure_still_sends_with_template() {
    let db = OutreachDb::open_in_memory().unwrap();
    seed(&db, None, BusinessHours::default(), &["a@p.io", "b@p.io"]);
    let writer = FakeWriter { fail: true };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let summary = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(summary.sent.initial.len(), 2);
    assert_eq!(summary.content_fallbacks, 2);
    assert!(summary.errors.is_empty());

    let outbox = mailer.outbox.lock().unwrap();
    assert!(outbox.iter().all(|e| e.body.starts_with("Hi Ana,")));
    assert!(outbox.iter().all(|e| e.from.email == "rep@acmegrowth.io"));
}

#[tokio::test]
async fn test_transport_failure_is_retried_next_run() {
    let db = OutreachDb::open_in_memory().unwrap();
    let leads = seed(&db, None, BusinessHours::default(), &["ok@p.io", "bad@p.io"]);
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer { bounce: vec!["bad@p.io".into()], ..Default::default() };
    let c = collaborators(&db, &db, &writer, &mailer);

    let summary = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(summary.sent.initial, vec!["ok@p.io"]);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].lead, "bad@p.io");
    assert!(summary.errors[0].error.contains("550"));
    assert!(db.history(&leads[1].id).unwrap().is_empty());

    // No event was written, so the lead is still eligible for its initial.
    let again = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(again.errors.len(), 1);
    assert_eq!(db.load_rate("acme").unwrap().unwrap().sent_today, 1);
}

#[tokio::test]
async fn test_dry_run_sends_and_persists_nothing() {
    let db = OutreachDb::open_in_memory().unwrap();
    let leads = seed(&db, None, BusinessHours::default(), &["a@p.io", "b@p.io"]);
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let mut opts = options();
    opts.dry_run = true;
    opts.follow_up.min_send_interval_secs = 3600;
    let summary = pipeline::run(&c, &opts, Utc::now()).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.sent.initial, vec!["a@p.io", "b@p.io"]);
    assert!(mailer.sent_to().is_empty());
    assert!(db.history(&leads[0].id).unwrap().is_empty());
    assert!(db.load_rate("acme").unwrap().is_none());
    assert!(db.leads("acme-q3").unwrap().iter().all(|l| l.status == LeadStatus::New));
}

#[tokio::test]
async fn test_tokyo_three_am_defers_to_nine() {
    let db = OutreachDb::open_in_memory().unwrap();
    let hours = BusinessHours {
        enabled: true,
        start_hour: 9,
        end_hour: 17,
        timezone: Some("Asia/Tokyo".into()),
        skip_weekends: false,
    };
    seed(&db, None, hours, &["a@p.io", "b@p.io"]);
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    // 03:00 JST on Mar 4.
    let now = Utc.with_ymd_and_hms(2026, 3, 3, 18, 0, 0).unwrap();
    let summary = pipeline::run(&c, &options(), now).await.unwrap();

    assert_eq!(summary.total_sent(), 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(
        summary.next_send_time,
        Some(Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap())
    );
    assert!(mailer.sent_to().is_empty());
}

#[tokio::test]
async fn test_daily_cap_holds_across_runs() {
    let db = OutreachDb::open_in_memory().unwrap();
    seed(&db, Some(2), BusinessHours::default(), &["a@p.io", "b@p.io", "c@p.io", "d@p.io", "e@p.io"]);
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let now = Utc::now();
    let first = pipeline::run(&c, &options(), now).await.unwrap();
    assert_eq!(first.sent.initial.len(), 2);
    assert_eq!(first.skipped, 3);
    assert!(first.next_send_time.is_some_and(|t| t > now));

    let second = pipeline::run(&c, &options(), now).await.unwrap();
    assert_eq!(second.total_sent(), 0);
    assert_eq!(mailer.sent_to().len(), 2);
}

#[tokio::test]
async fn test_suppressed_leads_never_receive_mail() {
    let db = OutreachDb::open_in_memory().unwrap();
    let leads = seed(&db, None, BusinessHours::default(), &["a@p.io", "gone@p.io"]);
    db.append(&sent_event(&leads[1], SequenceLabel::Initial, days_ago(3.2))).unwrap();
    db.suppress("gone@p.io", SuppressionKind::Replied).unwrap();

    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let summary = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(mailer.sent_to(), vec!["a@p.io".to_string()]);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_json_send_log_backend() {
    let db = OutreachDb::open_in_memory().unwrap();
    let leads = seed(&db, None, BusinessHours::default(), &["a@p.io"]);
    let path = std::env::temp_dir()
        .join(format!("legions-pipeline-{}", uuid::Uuid::new_v4()))
        .join("emails-sent.json");
    let log = JsonSendLog::open(&path).unwrap();
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &log, &writer, &mailer);

    pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    let second = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(second.total_sent(), 0);

    let reopened = JsonSendLog::open(&path).unwrap();
    assert_eq!(reopened.history(&leads[0].id).unwrap().len(), 1);
    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test]
async fn test_paused_campaigns_are_ignored() {
    let db = OutreachDb::open_in_memory().unwrap();
    seed(&db, None, BusinessHours::default(), &["a@p.io"]);
    db.upsert_campaign(&Campaign {
        id: "acme-q3".into(),
        client_id: "acme".into(),
        name: "Q3".into(),
        status: CampaignStatus::Paused,
        targeting: Default::default(),
        created_at: Utc::now(),
    })
    .unwrap();
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let c = collaborators(&db, &db, &writer, &mailer);

    let summary = pipeline::run(&c, &options(), Utc::now()).await.unwrap();
    assert_eq!(summary, legions_scheduler::RunSummary::new(false));
}

#[tokio::test]
async fn test_aborted_run_still_counts_against_cap() {
    let db = OutreachDb::open_in_memory().unwrap();
    seed(&db, Some(3), BusinessHours::default(), &["a@p.io", "b@p.io", "c@p.io", "d@p.io", "e@p.io"]);
    let writer = FakeWriter { fail: false };
    let mailer = FakeMailer::default();
    let now = Utc::now();

    let failing = FailingLog { db: &db, keep: 2, appended: AtomicUsize::new(0) };
    let first = pipeline::run(&collaborators(&db, &failing, &writer, &mailer), &options(), now).await;
    assert!(matches!(first, Err(LegionsError::Storage(_))));
    assert_eq!(mailer.sent_to().len(), 3);
    assert_eq!(db.load_rate("acme").unwrap().unwrap().sent_today, 3);

    let second = pipeline::run(&collaborators(&db, &db, &writer, &mailer), &options(), now).await.unwrap();
    assert_eq!(second.total_sent(), 0);
    assert_eq!(mailer.sent_to().len(), 3);
}
