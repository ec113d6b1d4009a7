//! Domain types: leads, campaigns, clients and the send-event log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LegionsError, Result};

// ─── Sequence ──────────────────────────────────────────────

/// Stage of the outreach cadence. Sends always follow this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceLabel {
    Initial,
    Followup1,
    Followup2,
    Breakup,
}

impl SequenceLabel {
    /// Canonical order of the cadence.
    pub const ORDER: [SequenceLabel; 4] = [
        SequenceLabel::Initial,
        SequenceLabel::Followup1,
        SequenceLabel::Followup2,
        SequenceLabel::Breakup,
    ];

    /// Number of follow-up stages after the initial email.
    pub const MAX_FOLLOW_UPS: usize = 3;

    /// Label expected at a position in a lead's history (0 = initial).
    pub fn at(position: usize) -> Option<Self> {
        Self::ORDER.get(position).copied()
    }

    /// Label of the follow-up with the given zero-based index.
    pub fn for_follow_up(index: usize) -> Option<Self> {
        Self::at(index + 1)
    }

    pub fn is_follow_up(&self) -> bool {
        !matches!(self, SequenceLabel::Initial)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceLabel::Initial => "initial",
            SequenceLabel::Followup1 => "followup1",
            SequenceLabel::Followup2 => "followup2",
            SequenceLabel::Breakup => "breakup",
        }
    }
}

impl std::fmt::Display for SequenceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SequenceLabel {
    type Err = LegionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initial" => Ok(SequenceLabel::Initial),
            "followup1" => Ok(SequenceLabel::Followup1),
            "followup2" => Ok(SequenceLabel::Followup2),
            "breakup" => Ok(SequenceLabel::Breakup),
            other => Err(LegionsError::InvalidData(format!(
                "unknown sequence label '{other}'"
            ))),
        }
    }
}

// ─── Leads ─────────────────────────────────────────────────

/// Lifecycle status of a lead. Leads are never deleted, only moved along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Replied,
    Bounced,
    Unsubscribed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Replied => "replied",
            LeadStatus::Bounced => "bounced",
            LeadStatus::Unsubscribed => "unsubscribed",
        }
    }

    /// Replied, bounced and unsubscribed leads never receive another email.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Replied | LeadStatus::Bounced | LeadStatus::Unsubscribed
        )
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = LegionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "replied" => Ok(LeadStatus::Replied),
            "bounced" => Ok(LeadStatus::Bounced),
            "unsubscribed" => Ok(LeadStatus::Unsubscribed),
            other => Err(LegionsError::InvalidData(format!(
                "unknown lead status '{other}'"
            ))),
        }
    }
}

/// A prospect targeted by a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub campaign_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Create a new lead; the id is derived from campaign + address so that
    /// re-importing the same roster never duplicates a lead.
    pub fn new(campaign_id: &str, email: &str) -> Self {
        Self {
            id: Self::derive_id(campaign_id, email),
            campaign_id: campaign_id.to_string(),
            email: email.trim().to_string(),
            name: None,
            company: None,
            title: None,
            status: LeadStatus::New,
            created_at: Utc::now(),
        }
    }

    /// Stable lead id: `lead-` + first 16 hex chars of sha256(campaign:email).
    pub fn derive_id(campaign_id: &str, email: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(campaign_id.as_bytes());
        hasher.update(b":");
        hasher.update(email.trim().to_lowercase().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("lead-{hex}")
    }

    /// First word of the name, or "there" for greetings.
    pub fn first_name(&self) -> &str {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or("there")
    }
}

// ─── Campaigns & clients ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = LegionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            other => Err(LegionsError::InvalidData(format!(
                "unknown campaign status '{other}'"
            ))),
        }
    }
}

/// Who a campaign is aimed at. Informational for content generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetingCriteria {
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub company_sizes: Vec<String>,
}

/// Groups leads under one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub client_id: String,
    pub name: String,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub targeting: TargetingCriteria,
    pub created_at: DateTime<Utc>,
}

/// The From identity used for a client's emails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl SenderIdentity {
    /// RFC 5322 mailbox: `Name <addr>` or bare `addr`.
    pub fn mailbox(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{name} <{}>", self.email),
            _ => self.email.clone(),
        }
    }
}

/// Business-hours policy of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    /// IANA zone name, e.g. "Asia/Tokyo". None defers to the run's timezone.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub skip_weekends: bool,
}

fn default_start_hour() -> u32 { 9 }
fn default_end_hour() -> u32 { 17 }

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            timezone: None,
            skip_weekends: false,
        }
    }
}

/// Tenant boundary: owns campaigns, carries sending configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default = "bool_true")]
    pub active: bool,
    pub sender: SenderIdentity,
    /// Daily send cap. None uses the configured default.
    #[serde(default)]
    pub daily_cap: Option<u32>,
    #[serde(default)]
    pub business_hours: BusinessHours,
}

fn bool_true() -> bool { true }

// ─── Follow-up cadence ─────────────────────────────────────

/// Cadence settings supplied per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpConfig {
    /// Days after the previous send at which each follow-up becomes due.
    #[serde(default = "default_delays")]
    pub delays_days: Vec<u32>,
    #[serde(default = "default_max_follow_ups")]
    pub max_follow_ups: usize,
    /// Force business-hours gating for every client.
    #[serde(default)]
    pub business_hours_only: bool,
    /// Fallback IANA zone for clients that don't name one.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Pause between two dispatches within a run.
    #[serde(default = "default_min_send_interval")]
    pub min_send_interval_secs: u64,
}

fn default_delays() -> Vec<u32> { vec![3, 7] }
fn default_max_follow_ups() -> usize { 2 }
fn default_min_send_interval() -> u64 { 30 }

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            delays_days: default_delays(),
            max_follow_ups: default_max_follow_ups(),
            business_hours_only: false,
            timezone: None,
            min_send_interval_secs: default_min_send_interval(),
        }
    }
}

impl FollowUpConfig {
    /// Delay (in days) before follow-up `index`, if one is configured.
    pub fn delay_for(&self, index: usize) -> Option<u32> {
        if index >= self.max_follow_ups {
            return None;
        }
        self.delays_days.get(index).copied()
    }

    /// Reject cadences the sequence cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_follow_ups > SequenceLabel::MAX_FOLLOW_UPS {
            return Err(LegionsError::config(format!(
                "max_follow_ups = {} but the sequence only has {} follow-up stages",
                self.max_follow_ups,
                SequenceLabel::MAX_FOLLOW_UPS
            )));
        }
        if self.delays_days.len() < self.max_follow_ups {
            return Err(LegionsError::config(format!(
                "max_follow_ups = {} needs at least that many delays, got {:?}",
                self.max_follow_ups, self.delays_days
            )));
        }
        if self.delays_days.iter().any(|d| *d == 0) {
            return Err(LegionsError::config("follow-up delays must be at least 1 day"));
        }
        Ok(())
    }
}

// ─── Send log ──────────────────────────────────────────────

/// One outbound email. Append-only; a lead's events are its stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEvent {
    pub id: String,
    pub lead_id: String,
    pub campaign_id: String,
    pub label: SequenceLabel,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Opaque personalisation payload (subject, generator used, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ─── Suppression ───────────────────────────────────────────

/// Why a lead is excluded from further sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionKind {
    Replied,
    Bounced,
    Unsubscribed,
}

impl SuppressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionKind::Replied => "replied",
            SuppressionKind::Bounced => "bounced",
            SuppressionKind::Unsubscribed => "unsubscribed",
        }
    }

    pub fn lead_status(&self) -> LeadStatus {
        match self {
            SuppressionKind::Replied => LeadStatus::Replied,
            SuppressionKind::Bounced => LeadStatus::Bounced,
            SuppressionKind::Unsubscribed => LeadStatus::Unsubscribed,
        }
    }
}

impl std::str::FromStr for SuppressionKind {
    type Err = LegionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replied" => Ok(SuppressionKind::Replied),
            "bounced" => Ok(SuppressionKind::Bounced),
            "unsubscribed" => Ok(SuppressionKind::Unsubscribed),
            other => Err(LegionsError::InvalidData(format!(
                "unknown suppression reason '{other}'"
            ))),
        }
    }
}

/// Externally-fed flags consulted before any eligibility decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionFlags {
    pub replied: bool,
    pub bounced: bool,
    pub unsubscribed: bool,
}

impl SuppressionFlags {
    pub fn from_kind(kind: SuppressionKind) -> Self {
        let mut flags = Self::default();
        flags.set(kind);
        flags
    }

    pub fn set(&mut self, kind: SuppressionKind) {
        match kind {
            SuppressionKind::Replied => self.replied = true,
            SuppressionKind::Bounced => self.bounced = true,
            SuppressionKind::Unsubscribed => self.unsubscribed = true,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.replied || self.bounced || self.unsubscribed
    }

    /// The first matching reason, replies first.
    pub fn kind(&self) -> Option<SuppressionKind> {
        if self.replied {
            Some(SuppressionKind::Replied)
        } else if self.bounced {
            Some(SuppressionKind::Bounced)
        } else if self.unsubscribed {
            Some(SuppressionKind::Unsubscribed)
        } else {
            None
        }
    }
}

// ─── Dispatch ──────────────────────────────────────────────

/// Generated subject + body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

/// A fully-rendered email ready for the transport.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub from: SenderIdentity,
}

/// Transport result. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn sent(message_id: Option<String>) -> Self {
        Self { success: true, message_id, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, message_id: None, error: Some(error.into()) }
    }
}

// ─── Rate state ────────────────────────────────────────────

/// Per-client daily send counter, persisted by the caller between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateState {
    pub day: NaiveDate,
    pub sent_today: u32,
}

impl RateState {
    pub fn new(day: NaiveDate) -> Self {
        Self { day, sent_today: 0 }
    }

    /// The same counter, reset if `day` is a new day.
    pub fn rolled(self, day: NaiveDate) -> Self {
        if day == self.day { self } else { Self::new(day) }
    }

    pub fn remaining(&self, cap: u32) -> u32 {
        cap.saturating_sub(self.sent_today)
    }

    pub fn record_send(&mut self) {
        self.sent_today = self.sent_today.saturating_add(1);
    }
}
