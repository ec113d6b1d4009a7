//! Collaborator seams of the send pipeline.
//!
//! Content generation and mail transport are async and external; the stores
//! are synchronous (SQLite / local files) and owned by the running process.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Campaign, Client, DispatchOutcome, EmailContent, Lead, OutboundEmail, RateState,
    SendEvent, SequenceLabel, SuppressionFlags,
};

/// Produces the subject and body for one email. May fail; callers fall back
/// to a deterministic template.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        lead: &Lead,
        client: &Client,
        label: SequenceLabel,
    ) -> Result<EmailContent>;
}

/// Delivers one email. Never returns an error: failures are reported in the
/// outcome so every dispatch can be handled the same way.
#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, email: &OutboundEmail) -> DispatchOutcome;
}

/// Replayable send history, indexed per lead.
pub trait SendLog: Send + Sync {
    /// Every event recorded for the lead, ordered by `sent_at`.
    fn history(&self, lead_id: &str) -> Result<Vec<SendEvent>>;

    fn append(&self, event: &SendEvent) -> Result<()>;
}

/// Clients, campaigns and leads the pipeline walks.
pub trait LeadBook: Send + Sync {
    fn active_clients(&self) -> Result<Vec<Client>>;

    fn active_campaigns(&self, client_id: &str) -> Result<Vec<Campaign>>;

    fn leads(&self, campaign_id: &str) -> Result<Vec<Lead>>;

    /// Advance a lead to `contacted` after a successful send.
    fn mark_contacted(&self, lead_id: &str) -> Result<()>;
}

/// Authoritative answer to "has this lead replied, bounced or unsubscribed".
pub trait SuppressionSource: Send + Sync {
    fn flags(&self, lead: &Lead) -> Result<SuppressionFlags>;
}

/// Persistence of per-client daily counters between runs.
pub trait RateStore: Send + Sync {
    fn load_rate(&self, client_id: &str) -> Result<Option<RateState>>;

    fn save_rate(&self, client_id: &str, state: &RateState) -> Result<()>;
}
