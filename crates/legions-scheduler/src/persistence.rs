//! SQLite-backed outreach database.
//!
//! Holds clients, campaigns, leads, the send-event log, suppressions, per-
//! client rate state, the run lease and run history. Implements every store
//! trait the pipeline needs, so one file is the whole state of the system.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use legions_core::error::{LegionsError, Result};
use legions_core::traits::{LeadBook, RateStore, SendLog, SuppressionSource};
use legions_core::types::{
    BusinessHours, Campaign, CampaignStatus, Client, Lead, LeadStatus, RateState, SendEvent,
    SenderIdentity, SuppressionFlags, SuppressionKind, TargetingCriteria,
};

use crate::summary::RunSummary;

/// Outreach database.
pub struct OutreachDb {
    conn: Mutex<Connection>,
}

/// One row of run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Follow-up settings the run used.
    pub follow_up: serde_json::Value,
    #[serde(default)]
    pub summary: Option<RunSummary>,
    /// Run-level failure, if the run aborted.
    #[serde(default)]
    pub error: Option<String>,
}

/// Current holder of the run lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRow {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> LegionsError + '_ {
    move |e| LegionsError::storage(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LegionsError::storage(format!("Bad timestamp '{s}': {e}")))
}

impl OutreachDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// In-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LegionsError::storage(format!("Lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                sender_email TEXT NOT NULL,
                sender_name TEXT,
                reply_to TEXT,
                daily_cap INTEGER,
                business_hours TEXT NOT NULL DEFAULT '{}',   -- JSON
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL REFERENCES clients(id),
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                targeting TEXT NOT NULL DEFAULT '{}',        -- JSON
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                email TEXT NOT NULL,
                name TEXT,
                company TEXT,
                title TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_campaign ON leads(campaign_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_leads_email ON leads(email COLLATE NOCASE);

            -- Append-only
            CREATE TABLE IF NOT EXISTS send_events (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                label TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                message_id TEXT,
                payload TEXT NOT NULL DEFAULT 'null'         -- JSON
            );
            CREATE INDEX IF NOT EXISTS idx_send_events_lead ON send_events(lead_id, sent_at);

            CREATE TABLE IF NOT EXISTS suppressions (
                email TEXT PRIMARY KEY COLLATE NOCASE,
                kind TEXT NOT NULL,                          -- replied, bounced, unsubscribed
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rate_state (
                client_id TEXT PRIMARY KEY,
                day TEXT NOT NULL,
                sent_today INTEGER NOT NULL DEFAULT 0
            );

            -- Single row
            CREATE TABLE IF NOT EXISTS run_lease (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_history (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                dry_run INTEGER NOT NULL DEFAULT 0,
                follow_up TEXT NOT NULL,                     -- JSON
                summary TEXT,                                -- JSON
                error TEXT
            );
         ",
            )
            .map_err(db_err("Migration"))?;
        Ok(())
    }

    // ─── Roster ───────────────────────────────────────────────

    /// Insert or update a client.
    pub fn upsert_client(&self, client: &Client) -> Result<()> {
        let hours = serde_json::to_string(&client.business_hours)?;
        self.conn()?
            .execute(
                "INSERT INTO clients (id, name, active, sender_email, sender_name, reply_to,
                                      daily_cap, business_hours, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, active = excluded.active,
                    sender_email = excluded.sender_email, sender_name = excluded.sender_name,
                    reply_to = excluded.reply_to, daily_cap = excluded.daily_cap,
                    business_hours = excluded.business_hours, updated_at = excluded.updated_at",
                params![
                    client.id,
                    client.name,
                    client.active as i32,
                    client.sender.email,
                    client.sender.name,
                    client.sender.reply_to,
                    client.daily_cap,
                    hours,
                    ts(Utc::now()),
                ],
            )
            .map_err(db_err("Save client"))?;
        Ok(())
    }

    /// Insert or update a campaign.
    pub fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let targeting = serde_json::to_string(&campaign.targeting)?;
        self.conn()?
            .execute(
                "INSERT INTO campaigns (id, client_id, name, status, targeting, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    client_id = excluded.client_id, name = excluded.name,
                    status = excluded.status, targeting = excluded.targeting",
                params![
                    campaign.id,
                    campaign.client_id,
                    campaign.name,
                    campaign.status.as_str(),
                    targeting,
                    ts(campaign.created_at),
                ],
            )
            .map_err(db_err("Save campaign"))?;
        Ok(())
    }

    /// Insert a lead, or refresh its profile. Status is never rolled back by
    /// a re-import. Returns true when the lead is new.
    pub fn upsert_lead(&self, lead: &Lead) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn
            .query_row("SELECT 1 FROM leads WHERE id = ?1", params![lead.id], |_| Ok(()))
            .optional()
            .map_err(db_err("Lookup lead"))?
            .is_some();

        if exists {
            conn.execute(
                "UPDATE leads SET name = COALESCE(?2, name), company = COALESCE(?3, company),
                                  title = COALESCE(?4, title)
                 WHERE id = ?1",
                params![lead.id, lead.name, lead.company, lead.title],
            )
            .map_err(db_err("Update lead"))?;
        } else {
            conn.execute(
                "INSERT INTO leads (id, campaign_id, email, name, company, title, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    lead.id,
                    lead.campaign_id,
                    lead.email,
                    lead.name,
                    lead.company,
                    lead.title,
                    lead.status.as_str(),
                    ts(lead.created_at),
                ],
            )
            .map_err(db_err("Insert lead"))?;
        }
        Ok(!exists)
    }

    pub fn get_client(&self, id: &str) -> Result<Option<Client>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{CLIENT_COLUMNS} WHERE id = ?1"),
                params![id],
                ClientRow::from_row,
            )
            .optional()
            .map_err(db_err("Load client"))?;
        row.map(ClientRow::into_client).transpose()
    }

    /// Every lead with this address, across campaigns.
    pub fn leads_by_email(&self, email: &str) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{LEAD_COLUMNS} WHERE email = ?1 COLLATE NOCASE ORDER BY created_at"
            ))
            .map_err(db_err("Query leads"))?;
        let rows = stmt
            .query_map(params![email.trim()], LeadRow::from_row)
            .map_err(db_err("Query leads"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read leads"))?;
        rows.into_iter().map(LeadRow::into_lead).collect()
    }

    // ─── Suppression ──────────────────────────────────────────

    /// Suppress an address. Matching leads move to the terminal status.
    /// Returns how many leads were updated.
    pub fn suppress(&self, email: &str, kind: SuppressionKind) -> Result<usize> {
        let email = email.trim();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO suppressions (email, kind, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(email) DO UPDATE SET kind = excluded.kind",
            params![email, kind.as_str(), ts(Utc::now())],
        )
        .map_err(db_err("Save suppression"))?;
        let updated = tx
            .execute(
                "UPDATE leads SET status = ?2 WHERE email = ?1 COLLATE NOCASE",
                params![email, kind.lead_status().as_str()],
            )
            .map_err(db_err("Update leads"))?;
        tx.commit().map_err(db_err("Commit"))?;

        tracing::info!("🚫 Suppressed {email} ({}), {updated} lead(s) updated", kind.as_str());
        Ok(updated)
    }

    pub fn suppression_for(&self, email: &str) -> Result<Option<SuppressionKind>> {
        let kind: Option<String> = self
            .conn()?
            .query_row(
                "SELECT kind FROM suppressions WHERE email = ?1 COLLATE NOCASE",
                params![email.trim()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Load suppression"))?;
        kind.map(|k| k.parse()).transpose()
    }

    // ─── Run lease ────────────────────────────────────────────

    /// Take the lease if it is free, expired or already ours.
    pub fn try_acquire_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<LeaseRow> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;

        let current = tx
            .query_row(
                "SELECT holder, acquired_at, expires_at FROM run_lease WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(db_err("Read lease"))?;

        if let Some((current_holder, _, expires_at)) = current {
            let expires = parse_ts(&expires_at)?;
            if current_holder != holder && expires > now {
                return Err(LegionsError::LeaseHeld {
                    holder: current_holder,
                    expires_at: expires.to_rfc3339(),
                });
            }
            if current_holder != holder {
                tracing::warn!("⚠️ Taking over stale run lease from {current_holder} (expired {expires})");
            }
        }

        let lease = LeaseRow {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        tx.execute(
            "INSERT OR REPLACE INTO run_lease (id, holder, acquired_at, expires_at)
             VALUES (1, ?1, ?2, ?3)",
            params![lease.holder, ts(lease.acquired_at), ts(lease.expires_at)],
        )
        .map_err(db_err("Write lease"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(lease)
    }

    /// Push the expiry of a lease `holder` still owns to `now + ttl`.
    /// Fails with `LeaseLost` once another run has taken it over.
    pub fn renew_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<LeaseRow> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;

        let current = tx
            .query_row(
                "SELECT holder, acquired_at FROM run_lease WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(db_err("Read lease"))?;

        let acquired_at = match current {
            Some((current_holder, acquired)) if current_holder == holder => parse_ts(&acquired)?,
            Some((current_holder, _)) => {
                return Err(LegionsError::LeaseLost { holder: current_holder });
            }
            None => return Err(LegionsError::LeaseLost { holder: "nobody".into() }),
        };

        let lease = LeaseRow {
            holder: holder.to_string(),
            acquired_at,
            expires_at: now + ttl,
        };
        tx.execute(
            "UPDATE run_lease SET expires_at = ?1 WHERE id = 1 AND holder = ?2",
            params![ts(lease.expires_at), lease.holder],
        )
        .map_err(db_err("Renew lease"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(lease)
    }

    /// Release the lease if `holder` still owns it.
    pub fn release_lease(&self, holder: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute("DELETE FROM run_lease WHERE id = 1 AND holder = ?1", params![holder])
            .map_err(db_err("Release lease"))?;
        Ok(n > 0)
    }

    pub fn current_lease(&self) -> Result<Option<LeaseRow>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT holder, acquired_at, expires_at FROM run_lease WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(db_err("Read lease"))?;
        row.map(|(holder, acquired, expires)| {
            Ok(LeaseRow {
                holder,
                acquired_at: parse_ts(&acquired)?,
                expires_at: parse_ts(&expires)?,
            })
        })
        .transpose()
    }

    // ─── Run history ──────────────────────────────────────────

    pub fn record_run(&self, record: &RunRecord) -> Result<()> {
        let summary = record.summary.as_ref().map(serde_json::to_string).transpose()?;
        self.conn()?
            .execute(
                "INSERT INTO run_history (id, started_at, finished_at, dry_run, follow_up, summary, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    ts(record.started_at),
                    ts(record.finished_at),
                    record.dry_run as i32,
                    record.follow_up.to_string(),
                    summary,
                    record.error,
                ],
            )
            .map_err(db_err("Save run"))?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, started_at, finished_at, dry_run, follow_up, summary, error
                 FROM run_history ORDER BY started_at DESC LIMIT ?1",
            )
            .map_err(db_err("Query runs"))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? != 0,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(db_err("Query runs"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read runs"))?;

        rows.into_iter()
            .map(|(id, started, finished, dry_run, follow_up, summary, error)| {
                Ok(RunRecord {
                    id,
                    started_at: parse_ts(&started)?,
                    finished_at: parse_ts(&finished)?,
                    dry_run,
                    follow_up: serde_json::from_str(&follow_up)?,
                    summary: summary.as_deref().map(serde_json::from_str).transpose()?,
                    error,
                })
            })
            .collect()
    }
}

// ─── Row mapping ──────────────────────────────────────────────

const CLIENT_COLUMNS: &str = "SELECT id, name, active, sender_email, sender_name, reply_to, \
                              daily_cap, business_hours FROM clients";
const CAMPAIGN_COLUMNS: &str =
    "SELECT id, client_id, name, status, targeting, created_at FROM campaigns";
const LEAD_COLUMNS: &str =
    "SELECT id, campaign_id, email, name, company, title, status, created_at FROM leads";

struct ClientRow {
    id: String,
    name: String,
    active: bool,
    sender_email: String,
    sender_name: Option<String>,
    reply_to: Option<String>,
    daily_cap: Option<u32>,
    business_hours: String,
}

impl ClientRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            active: row.get::<_, i32>(2)? != 0,
            sender_email: row.get(3)?,
            sender_name: row.get(4)?,
            reply_to: row.get(5)?,
            daily_cap: row.get(6)?,
            business_hours: row.get(7)?,
        })
    }

    fn into_client(self) -> Result<Client> {
        let business_hours: BusinessHours = serde_json::from_str(&self.business_hours)?;
        Ok(Client {
            id: self.id,
            name: self.name,
            active: self.active,
            sender: SenderIdentity {
                email: self.sender_email,
                name: self.sender_name,
                reply_to: self.reply_to,
            },
            daily_cap: self.daily_cap,
            business_hours,
        })
    }
}

struct CampaignRow {
    id: String,
    client_id: String,
    name: String,
    status: String,
    targeting: String,
    created_at: String,
}

impl CampaignRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_id: row.get(1)?,
            name: row.get(2)?,
            status: row.get(3)?,
            targeting: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_campaign(self) -> Result<Campaign> {
        let targeting: TargetingCriteria = serde_json::from_str(&self.targeting)?;
        Ok(Campaign {
            id: self.id,
            client_id: self.client_id,
            name: self.name,
            status: self.status.parse::<CampaignStatus>()?,
            targeting,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct LeadRow {
    id: String,
    campaign_id: String,
    email: String,
    name: Option<String>,
    company: Option<String>,
    title: Option<String>,
    status: String,
    created_at: String,
}

impl LeadRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            email: row.get(2)?,
            name: row.get(3)?,
            company: row.get(4)?,
            title: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_lead(self) -> Result<Lead> {
        Ok(Lead {
            id: self.id,
            campaign_id: self.campaign_id,
            email: self.email,
            name: self.name,
            company: self.company,
            title: self.title,
            status: self.status.parse::<LeadStatus>()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

// ─── Store traits ─────────────────────────────────────────────

impl SendLog for OutreachDb {
    fn history(&self, lead_id: &str) -> Result<Vec<SendEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, lead_id, campaign_id, label, sent_at, message_id, payload
                 FROM send_events WHERE lead_id = ?1 ORDER BY sent_at, rowid",
            )
            .map_err(db_err("Query history"))?;
        let rows = stmt
            .query_map(params![lead_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(db_err("Query history"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read history"))?;

        rows.into_iter()
            .map(|(id, lead_id, campaign_id, label, sent_at, message_id, payload)| {
                Ok(SendEvent {
                    id,
                    lead_id,
                    campaign_id,
                    label: label.parse()?,
                    sent_at: parse_ts(&sent_at)?,
                    message_id,
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    fn append(&self, event: &SendEvent) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO send_events (id, lead_id, campaign_id, label, sent_at, message_id, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.lead_id,
                    event.campaign_id,
                    event.label.as_str(),
                    ts(event.sent_at),
                    event.message_id,
                    event.payload.to_string(),
                ],
            )
            .map_err(db_err("Append send event"))?;
        Ok(())
    }
}

impl LeadBook for OutreachDb {
    fn active_clients(&self) -> Result<Vec<Client>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{CLIENT_COLUMNS} WHERE active = 1 ORDER BY id"))
            .map_err(db_err("Query clients"))?;
        let rows = stmt
            .query_map([], ClientRow::from_row)
            .map_err(db_err("Query clients"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read clients"))?;
        rows.into_iter().map(ClientRow::into_client).collect()
    }

    fn active_campaigns(&self, client_id: &str) -> Result<Vec<Campaign>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{CAMPAIGN_COLUMNS} WHERE client_id = ?1 AND status = 'active' ORDER BY created_at, id"
            ))
            .map_err(db_err("Query campaigns"))?;
        let rows = stmt
            .query_map(params![client_id], CampaignRow::from_row)
            .map_err(db_err("Query campaigns"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read campaigns"))?;
        rows.into_iter().map(CampaignRow::into_campaign).collect()
    }

    fn leads(&self, campaign_id: &str) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{LEAD_COLUMNS} WHERE campaign_id = ?1 ORDER BY created_at, rowid"))
            .map_err(db_err("Query leads"))?;
        let rows = stmt
            .query_map(params![campaign_id], LeadRow::from_row)
            .map_err(db_err("Query leads"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read leads"))?;
        rows.into_iter().map(LeadRow::into_lead).collect()
    }

    fn mark_contacted(&self, lead_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE leads SET status = 'contacted' WHERE id = ?1 AND status = 'new'",
                params![lead_id],
            )
            .map_err(db_err("Update lead"))?;
        Ok(())
    }
}

impl SuppressionSource for OutreachDb {
    fn flags(&self, lead: &Lead) -> Result<SuppressionFlags> {
        let mut flags = SuppressionFlags::default();
        match lead.status {
            LeadStatus::Replied => flags.set(SuppressionKind::Replied),
            LeadStatus::Bounced => flags.set(SuppressionKind::Bounced),
            LeadStatus::Unsubscribed => flags.set(SuppressionKind::Unsubscribed),
            LeadStatus::New | LeadStatus::Contacted => {}
        }
        if let Some(kind) = self.suppression_for(&lead.email)? {
            flags.set(kind);
        }
        Ok(flags)
    }
}

impl RateStore for OutreachDb {
    fn load_rate(&self, client_id: &str) -> Result<Option<RateState>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT day, sent_today FROM rate_state WHERE client_id = ?1",
                params![client_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()
            .map_err(db_err("Load rate state"))?;
        row.map(|(day, sent_today)| {
            let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .map_err(|e| LegionsError::storage(format!("Bad rate day '{day}': {e}")))?;
            Ok(RateState { day, sent_today })
        })
        .transpose()
    }

    fn save_rate(&self, client_id: &str, state: &RateState) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO rate_state (client_id, day, sent_today) VALUES (?1, ?2, ?3)",
                params![client_id, state.day.format("%Y-%m-%d").to_string(), state.sent_today],
            )
            .map_err(db_err("Save rate state"))?;
        Ok(())
    }
}
