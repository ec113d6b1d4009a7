//! Send executor: generates content, dispatches and records each planned send.
//!
//! Per action: content (fallback on failure) → renew the run lease →
//! transport → append the send event → count against the daily cap and save
//! it → mark the lead contacted. Dispatch failures are recorded per lead and
//! never stop the run; failing to record a send that already went out does,
//! after the send has been counted.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use legions_core::error::{LegionsError, Result};
use legions_core::templates;
use legions_core::traits::{ContentGenerator, LeadBook, MailTransport, RateStore, SendLog};
use legions_core::types::{
    Client, EmailContent, Lead, LeadStatus, OutboundEmail, RateState, SendEvent, SequenceLabel,
};

use crate::gate::SendPlan;
use crate::lease::RunLease;
use crate::summary::RunSummary;

/// Pause between two dispatch attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pacing {
    pub interval: Duration,
    /// Upper bound of the random extra pause.
    pub jitter: Duration,
}

impl Pacing {
    pub fn new(interval_secs: u64, jitter_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            jitter: Duration::from_secs(jitter_secs),
        }
    }

    /// No pause at all.
    pub fn none() -> Self {
        Self::default()
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.interval + Duration::from_millis(extra)
    }
}

/// Executes send plans against the collaborators.
pub struct SendExecutor<'a> {
    generator: &'a dyn ContentGenerator,
    transport: &'a dyn MailTransport,
    log: &'a dyn SendLog,
    book: &'a dyn LeadBook,
    rates: Option<&'a dyn RateStore>,
    lease: Option<&'a RunLease<'a>>,
    pacing: Pacing,
    dispatch_timeout: Duration,
    dry_run: bool,
    attempts: usize,
}

impl<'a> SendExecutor<'a> {
    pub fn new(
        generator: &'a dyn ContentGenerator,
        transport: &'a dyn MailTransport,
        log: &'a dyn SendLog,
        book: &'a dyn LeadBook,
    ) -> Self {
        Self {
            generator,
            transport,
            log,
            book,
            rates: None,
            lease: None,
            pacing: Pacing::none(),
            dispatch_timeout: Duration::from_secs(60),
            dry_run: false,
            attempts: 0,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Persist the client's rate state after every counted send.
    pub fn with_rate_store(mut self, rates: &'a dyn RateStore) -> Self {
        self.rates = Some(rates);
        self
    }

    /// Renew this lease before every dispatch.
    pub fn with_lease(mut self, lease: Option<&'a RunLease<'a>>) -> Self {
        self.lease = lease;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Dispatch attempts made so far in this run.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Execute one client's plan in order. `state` is advanced (and saved,
    /// with a rate store) once per send that went out.
    pub async fn execute(
        &mut self,
        client: &Client,
        plan: &SendPlan,
        state: &mut RateState,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for action in &plan.actions {
            let content = self.content_for(&action.lead, client, action.label, summary).await;

            if self.dry_run {
                tracing::info!(
                    "🧪 [dry run] would send {} to {}: \"{}\"",
                    action.label,
                    action.lead.email,
                    content.subject
                );
                summary.record_sent(action.label, &action.lead.email);
                continue;
            }

            if self.attempts > 0 {
                let delay = self.pacing.next_delay();
                if !delay.is_zero() {
                    tracing::debug!("⏳ Pacing {:?} before next send", delay);
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some(lease) = self.lease {
                lease.renew(Utc::now())?;
            }
            self.attempts += 1;

            self.dispatch(client, &action.lead, action.label, content, state, summary)
                .await?;
        }
        Ok(())
    }

    async fn content_for(
        &self,
        lead: &Lead,
        client: &Client,
        label: SequenceLabel,
        summary: &mut RunSummary,
    ) -> EmailContent {
        let generated = tokio::time::timeout(
            self.dispatch_timeout,
            self.generator.generate(lead, client, label),
        )
        .await;

        match generated {
            Ok(Ok(content)) if !content.subject.trim().is_empty() && !content.body.trim().is_empty() => {
                content
            }
            Ok(Ok(_)) => {
                tracing::warn!("⚠️ {} returned empty content for {}, using template", self.generator.name(), lead.email);
                summary.content_fallbacks += 1;
                templates::fallback(lead, client, label)
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Content generation failed for {}: {e}, using template", lead.email);
                summary.content_fallbacks += 1;
                templates::fallback(lead, client, label)
            }
            Err(_) => {
                tracing::warn!(
                    "⚠️ Content generation timed out after {:?} for {}, using template",
                    self.dispatch_timeout,
                    lead.email
                );
                summary.content_fallbacks += 1;
                templates::fallback(lead, client, label)
            }
        }
    }

    async fn dispatch(
        &self,
        client: &Client,
        lead: &Lead,
        label: SequenceLabel,
        content: EmailContent,
        state: &mut RateState,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let email = OutboundEmail {
            to: lead.email.clone(),
            subject: content.subject,
            body: content.body,
            from: client.sender.clone(),
        };

        let outcome = match tokio::time::timeout(self.dispatch_timeout, self.transport.send(&email)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let msg = format!("dispatch timed out after {}s", self.dispatch_timeout.as_secs());
                tracing::warn!("❌ {} → {}: {msg}", label, lead.email);
                summary.record_error(&lead.email, msg);
                return Ok(());
            }
        };

        if !outcome.success {
            let msg = outcome.error.unwrap_or_else(|| "unknown transport error".into());
            tracing::warn!("❌ {} → {}: {msg}", label, lead.email);
            summary.record_error(&lead.email, msg);
            return Ok(());
        }

        let event = SendEvent {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead.id.clone(),
            campaign_id: lead.campaign_id.clone(),
            label,
            sent_at: Utc::now(),
            message_id: outcome.message_id.clone(),
            payload: serde_json::json!({
                "subject": email.subject,
                "client_id": client.id,
                "transport": self.transport.name(),
            }),
        };
        let recorded = self.log.append(&event);

        // The email is out either way, so it counts against today's cap.
        state.record_send();
        let saved = match self.rates {
            Some(rates) => rates.save_rate(&client.id, state),
            None => Ok(()),
        };

        recorded.map_err(|e| {
            LegionsError::storage(format!(
                "{} was sent to {} but could not be recorded: {e}",
                label, lead.email
            ))
        })?;
        saved?;

        if lead.status == LeadStatus::New {
            self.book.mark_contacted(&lead.id)?;
        }
        summary.record_sent(label, &lead.email);

        tracing::info!("📧 {} → {} ({})", label, lead.email, client.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Candidate;
    use async_trait::async_trait;
    use legions_core::types::{Campaign, DispatchOutcome, SenderIdentity};
    use std::sync::Mutex;

    struct Generator {
        fail: bool,
    }

    #[async_trait]
    impl ContentGenerator for Generator {
        fn name(&self) -> &str {
            "test"
        }

        async fn generate(&self, lead: &Lead, _: &Client, label: SequenceLabel) -> Result<EmailContent> {
            if self.fail {
                return Err(LegionsError::provider("model offline"));
            }
            Ok(EmailContent {
                subject: format!("{label} for {}", lead.email),
                body: "Hello".into(),
            })
        }
    }

    struct Transport {
        reject: Option<&'static str>,
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl Transport {
        fn new(reject: Option<&'static str>) -> Self {
            Self { reject, sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl MailTransport for Transport {
        fn name(&self) -> &str {
            "test"
        }

        async fn send(&self, email: &OutboundEmail) -> DispatchOutcome {
            self.sent.lock().unwrap().push(email.clone());
            if Some(email.to.as_str()) == self.reject {
                DispatchOutcome::failed("550 mailbox unavailable")
            } else {
                DispatchOutcome::sent(Some(format!("<{}>", email.to)))
            }
        }
    }

    #[derive(Default)]
    struct Memory {
        events: Mutex<Vec<SendEvent>>,
        contacted: Mutex<Vec<String>>,
        fail_append: bool,
        /// Fail every append once this many events are stored.
        fail_after: Option<usize>,
    }

    impl SendLog for Memory {
        fn history(&self, lead_id: &str) -> Result<Vec<SendEvent>> {
            Ok(self.events.lock().unwrap().iter().filter(|e| e.lead_id == lead_id).cloned().collect())
        }

        fn append(&self, event: &SendEvent) -> Result<()> {
            let mut events = self.events.lock().unwrap();
            if self.fail_append || self.fail_after.is_some_and(|n| events.len() >= n) {
                return Err(LegionsError::storage("disk full"));
            }
            events.push(event.clone());
            Ok(())
        }
    }

    impl LeadBook for Memory {
        fn active_clients(&self) -> Result<Vec<Client>> {
            Ok(Vec::new())
        }

        fn active_campaigns(&self, _: &str) -> Result<Vec<Campaign>> {
            Ok(Vec::new())
        }

        fn leads(&self, _: &str) -> Result<Vec<Lead>> {
            Ok(Vec::new())
        }

        fn mark_contacted(&self, lead_id: &str) -> Result<()> {
            self.contacted.lock().unwrap().push(lead_id.to_string());
            Ok(())
        }
    }

    fn client() -> Client {
        Client {
            id: "client-1".into(),
            name: "Acme Growth".into(),
            active: true,
            sender: SenderIdentity {
                email: "rep@acmegrowth.io".into(),
                name: Some("Rita Rep".into()),
                reply_to: None,
            },
            daily_cap: None,
            business_hours: Default::default(),
        }
    }

    fn plan(emails: &[&str]) -> SendPlan {
        SendPlan {
            actions: emails
                .iter()
                .map(|e| Candidate::new(Lead::new("camp-1", e), SequenceLabel::Initial))
                .collect(),
            ..Default::default()
        }
    }

    fn today() -> RateState {
        RateState::new(Utc::now().date_naive())
    }

    #[tokio::test]
    async fn test_success_records_event_and_counts() {
        let generator = Generator { fail: false };
        let transport = Transport::new(None);
        let store = Memory::default();
        let mut executor = SendExecutor::new(&generator, &transport, &store, &store);
        let mut state = today();
        let mut summary = RunSummary::new(false);

        executor
            .execute(&client(), &plan(&["a@x.io", "b@x.io"]), &mut state, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.sent.initial, vec!["a@x.io", "b@x.io"]);
        assert_eq!(state.sent_today, 2);
        assert_eq!(store.events.lock().unwrap().len(), 2);
        assert_eq!(store.contacted.lock().unwrap().len(), 2);
        assert_eq!(executor.attempts(), 2);
        let events = store.events.lock().unwrap();
        assert_eq!(events[0].message_id.as_deref(), Some("<a@x.io>"));
        assert_eq!(events[0].payload["subject"], "initial for a@x.io");
    }

    #[tokio::test]
    async fn test_transport_failure_is_isolated() {
        let generator = Generator { fail: false };
        let transport = Transport::new(Some("b@x.io"));
        let store = Memory::default();
        let mut executor = SendExecutor::new(&generator, &transport, &store, &store);
        let mut state = today();
        let mut summary = RunSummary::new(false);

        executor
            .execute(&client(), &plan(&["a@x.io", "b@x.io", "c@x.io"]), &mut state, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.sent.initial, vec!["a@x.io", "c@x.io"]);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].lead, "b@x.io");
        assert_eq!(state.sent_today, 2);
        let events = store.events.lock().unwrap();
        assert!(events.iter().all(|e| e.lead_id != Lead::derive_id("camp-1", "b@x.io")));
    }

    #[tokio::test]
    async fn test_content_failure_falls_back() {
        let generator = Generator { fail: true };
        let transport = Transport::new(None);
        let store = Memory::default();
        let mut executor = SendExecutor::new(&generator, &transport, &store, &store);
        let mut state = today();
        let mut summary = RunSummary::new(false);

        executor
            .execute(&client(), &plan(&["a@x.io"]), &mut state, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.sent.initial.len(), 1);
        assert_eq!(summary.content_fallbacks, 1);
        assert!(summary.errors.is_empty());
        let sent = transport.sent.lock().unwrap();
        let expected = templates::fallback(&Lead::new("camp-1", "a@x.io"), &client(), SequenceLabel::Initial);
        assert_eq!(sent[0].subject, expected.subject);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let generator = Generator { fail: false };
        let transport = Transport::new(None);
        let store = Memory::default();
        let mut executor = SendExecutor::new(&generator, &transport, &store, &store)
            .with_pacing(Pacing::new(3600, 0))
            .dry_run(true);
        let mut state = today();
        let mut summary = RunSummary::new(true);

        executor
            .execute(&client(), &plan(&["a@x.io", "b@x.io"]), &mut state, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.sent.initial.len(), 2);
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(store.events.lock().unwrap().is_empty());
        assert_eq!(state.sent_today, 0);
        assert_eq!(executor.attempts(), 0);
    }

    #[tokio::test]
    async fn test_unrecorded_send_is_run_level_error() {
        let generator = Generator { fail: false };
        let transport = Transport::new(None);
        let store = Memory { fail_append: true, ..Default::default() };
        let mut executor = SendExecutor::new(&generator, &transport, &store, &store);
        let mut state = today();
        let mut summary = RunSummary::new(false);

        let result = executor
            .execute(&client(), &plan(&["a@x.io", "b@x.io"]), &mut state, &mut summary)
            .await;

        assert!(matches!(result, Err(LegionsError::Storage(_))));
        // Stops at the first unrecorded send, which still counts.
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(state.sent_today, 1);
        assert!(summary.sent.initial.is_empty());
    }

    #[tokio::test]
    async fn test_rate_state_saved_after_each_send() {
        let db = crate::OutreachDb::open_in_memory().unwrap();
        let generator = Generator { fail: false };
        let transport = Transport::new(None);
        let store = Memory { fail_after: Some(2), ..Default::default() };
        let mut executor =
            SendExecutor::new(&generator, &transport, &store, &store).with_rate_store(&db);
        let mut state = today();
        let mut summary = RunSummary::new(false);

        let result = executor
            .execute(&client(), &plan(&["a@x.io", "b@x.io", "c@x.io", "d@x.io"]), &mut state, &mut summary)
            .await;

        assert!(result.is_err());
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
        assert_eq!(db.load_rate("client-1").unwrap().unwrap().sent_today, 3);
    }

    #[tokio::test]
    async fn test_lost_lease_stops_before_dispatch() {
        let db = crate::OutreachDb::open_in_memory().unwrap();
        let now = Utc::now();
        let lease = RunLease::acquire_as(&db, "cron@h:1".into(), 60, now - chrono::Duration::seconds(120)).unwrap();
        let _other = RunLease::acquire_as(&db, "cron@h:2".into(), 600, now).unwrap();

        let generator = Generator { fail: false };
        let transport = Transport::new(None);
        let store = Memory::default();
        let mut executor =
            SendExecutor::new(&generator, &transport, &store, &store).with_lease(Some(&lease));
        let mut state = today();
        let mut summary = RunSummary::new(false);

        let result = executor
            .execute(&client(), &plan(&["a@x.io"]), &mut state, &mut summary)
            .await;

        assert!(matches!(result, Err(LegionsError::LeaseLost { .. })));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pacing_delay_bounds() {
        let pacing = Pacing::new(2, 3);
        for _ in 0..50 {
            let d = pacing.next_delay();
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(5));
        }
        assert!(Pacing::none().next_delay().is_zero());
    }
}
