//! Roster import: clients, their campaigns and leads from one JSON file.
//!
//! ```json
//! { "clients": [ { "id": "acme", "name": "Acme", "sender": { "email": "rep@acme.io" },
//!     "campaigns": [ { "id": "q3", "name": "Q3", "leads": [ { "email": "ana@x.io" } ] } ] } ] }
//! ```
//!
//! Re-importing is safe: lead ids are derived from campaign + address and a
//! lead's status is never reset.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

use legions_core::config::BusinessHoursDefaults;
use legions_core::error::{LegionsError, Result};
use legions_core::types::{
    BusinessHours, Campaign, CampaignStatus, Client, Lead, SenderIdentity, TargetingCriteria,
};

use crate::persistence::OutreachDb;

#[derive(Debug, Clone, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub clients: Vec<RosterClient>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterClient {
    pub id: String,
    pub name: String,
    #[serde(default = "bool_true")]
    pub active: bool,
    pub sender: SenderIdentity,
    #[serde(default)]
    pub daily_cap: Option<u32>,
    /// Missing policy: gating off, hours from the configured defaults.
    #[serde(default)]
    pub business_hours: Option<BusinessHours>,
    #[serde(default)]
    pub campaigns: Vec<RosterCampaign>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterCampaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub targeting: TargetingCriteria,
    #[serde(default)]
    pub leads: Vec<RosterLead>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterLead {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

fn bool_true() -> bool { true }

/// What an import changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub clients: usize,
    pub campaigns: usize,
    pub leads_added: usize,
    pub leads_updated: usize,
    /// Rejected addresses.
    pub invalid: Vec<String>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| LegionsError::InvalidData(format!("Read {}: {e}", path.display())))?;
        Self::parse(&json)
    }

    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| LegionsError::InvalidData(format!("Roster: {e}")))
    }
}

/// Loose syntactic check; the relay has the final say.
fn plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn client_from(entry: &RosterClient, defaults: &BusinessHoursDefaults) -> Client {
    let business_hours = entry.business_hours.clone().unwrap_or_else(|| BusinessHours {
        enabled: false,
        start_hour: defaults.start_hour,
        end_hour: defaults.end_hour,
        timezone: None,
        skip_weekends: defaults.skip_weekends,
    });
    Client {
        id: entry.id.clone(),
        name: entry.name.clone(),
        active: entry.active,
        sender: entry.sender.clone(),
        daily_cap: entry.daily_cap,
        business_hours,
    }
}

/// Upsert the whole roster.
pub fn import(
    db: &OutreachDb,
    roster: &Roster,
    defaults: &BusinessHoursDefaults,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for entry in &roster.clients {
        if entry.id.trim().is_empty() {
            return Err(LegionsError::InvalidData("client with empty id".into()));
        }
        if !plausible_email(&entry.sender.email) {
            return Err(LegionsError::InvalidData(format!(
                "client {} has an invalid sender address '{}'",
                entry.id, entry.sender.email
            )));
        }
        let client = client_from(entry, defaults);
        if client.business_hours.start_hour >= client.business_hours.end_hour
            || client.business_hours.end_hour > 24
        {
            return Err(LegionsError::InvalidData(format!(
                "client {} has business hours [{}, {})",
                client.id, client.business_hours.start_hour, client.business_hours.end_hour
            )));
        }
        db.upsert_client(&client)?;
        report.clients += 1;

        for camp in &entry.campaigns {
            let campaign = Campaign {
                id: camp.id.clone(),
                client_id: client.id.clone(),
                name: camp.name.clone(),
                status: camp.status,
                targeting: camp.targeting.clone(),
                created_at: Utc::now(),
            };
            db.upsert_campaign(&campaign)?;
            report.campaigns += 1;

            for row in &camp.leads {
                let email = row.email.trim();
                if !plausible_email(email) {
                    tracing::warn!("⚠️ Skipping invalid address '{}' in {}", row.email, camp.id);
                    report.invalid.push(row.email.clone());
                    continue;
                }
                let mut lead = Lead::new(&campaign.id, email);
                lead.name = row.name.clone();
                lead.company = row.company.clone();
                lead.title = row.title.clone();

                if db.upsert_lead(&lead)? {
                    report.leads_added += 1;
                } else {
                    report.leads_updated += 1;
                }
            }
        }
    }

    tracing::info!(
        "📥 Imported {} clients, {} campaigns, {} new leads ({} updated, {} invalid)",
        report.clients,
        report.campaigns,
        report.leads_added,
        report.leads_updated,
        report.invalid.len()
    );
    Ok(report)
}
