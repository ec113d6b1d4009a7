//! # Legions: cold-email follow-up scheduler
//!
//! One invocation is one batch run; schedule it from cron.
//!
//! Usage:
//!   legions init                                  # Write ~/.legions/config.toml
//!   legions import roster.json                    # Load clients, campaigns, leads
//!   legions run --dry-run                         # Show what would be sent
//!   legions run --delays 3,7 --business-hours-only
//!   legions suppress ana@acme.io --reason replied
//!   legions status ana@acme.io
//!   legions history --limit 20

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use legions_channels::{DisabledMailer, SmtpMailer};
use legions_core::config::LegionsConfig;
use legions_core::traits::{MailTransport, SendLog};
use legions_core::types::SuppressionKind;
use legions_scheduler::dispatch;
use legions_scheduler::gate;
use legions_scheduler::notify::{self, Notification};
use legions_scheduler::pipeline::{self, Collaborators, RunOptions};
use legions_scheduler::roster::{self, Roster};
use legions_scheduler::{JsonSendLog, OutreachDb, RunLease, RunRecord, RunSummary};

#[derive(Parser)]
#[command(
    name = "legions",
    version,
    about = "📨 Legions: follow-up scheduler and rate-governed send loop"
)]
struct Cli {
    /// Config file (default: ~/.legions/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the send pipeline once
    Run(RunArgs),
    /// Import clients, campaigns and leads from a JSON roster
    Import {
        file: PathBuf,
    },
    /// Stop all further email to an address
    Suppress {
        email: String,
        /// replied, bounced or unsubscribed
        #[arg(long)]
        reason: String,
    },
    /// Send history and next action for every lead with this address
    Status {
        email: String,
    },
    /// Recent runs
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Log and report intended sends without sending or recording anything
    #[arg(long)]
    dry_run: bool,

    /// Follow-up delays in days, e.g. 3,7
    #[arg(long, value_delimiter = ',')]
    delays: Option<Vec<u32>>,

    /// Number of follow-ups after the initial email (at most 3)
    #[arg(long)]
    max_follow_ups: Option<usize>,

    /// Only send inside each client's business hours
    #[arg(long)]
    business_hours_only: bool,

    /// Timezone for clients that don't set one (IANA name)
    #[arg(long)]
    timezone: Option<String>,

    /// Seconds between two sends
    #[arg(long)]
    min_send_interval: Option<u64>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut LegionsConfig) {
        let follow_up = &mut config.follow_up;
        if let Some(delays) = &self.delays {
            follow_up.delays_days = delays.clone();
        }
        if let Some(max) = self.max_follow_ups {
            follow_up.max_follow_ups = max;
        }
        if self.business_hours_only {
            follow_up.business_hours_only = true;
        }
        if let Some(tz) = &self.timezone {
            follow_up.timezone = Some(tz.clone());
        }
        if let Some(secs) = self.min_send_interval {
            follow_up.min_send_interval_secs = secs;
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "legions=debug,legions_scheduler=debug,legions_providers=debug,legions_channels=debug"
    } else {
        "legions=info,legions_scheduler=info,legions_providers=warn,legions_channels=info"
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<LegionsConfig> {
    let mut config = match path {
        Some(p) => LegionsConfig::load_from(p)?,
        None => LegionsConfig::load()?,
    };
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Commands::Init { force } = &cli.command {
        return cmd_init(cli.config.as_deref(), *force);
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Commands::Run(args) = &cli.command {
        args.apply(&mut config);
    }
    config.validate()?;

    match cli.command {
        Commands::Run(args) => cmd_run(&config, &args).await,
        Commands::Import { file } => cmd_import(&config, &file),
        Commands::Suppress { email, reason } => cmd_suppress(&config, &email, &reason),
        Commands::Status { email } => cmd_status(&config, &email),
        Commands::History { limit } => cmd_history(&config, limit),
        Commands::Init { .. } => Ok(()),
    }
}

// ─── run ──────────────────────────────────────────────────────

async fn cmd_run(config: &LegionsConfig, args: &RunArgs) -> Result<()> {
    let started_at = Utc::now();
    let targets = dispatch::targets_from_config(&config.notify);

    let outcome = run_once(config, args.dry_run).await;

    let record = |summary: Option<RunSummary>, error: Option<String>| RunRecord {
        id: uuid::Uuid::new_v4().to_string(),
        started_at,
        finished_at: Utc::now(),
        dry_run: args.dry_run,
        follow_up: serde_json::to_value(&config.follow_up).unwrap_or_default(),
        summary,
        error,
    };

    match outcome {
        Ok(summary) => {
            if !args.dry_run {
                // The run itself succeeded; a history write failure is only logged.
                if let Err(e) = save_run(config, &record(Some(summary.clone()), None)) {
                    tracing::warn!("⚠️ Failed to record run history: {e}");
                }
                if notify::worth_sending(&summary) {
                    dispatch::dispatch_all(&Notification::for_summary(&summary), &targets).await;
                }
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary.render());
            }
            Ok(())
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!("❌ Run aborted: {message}");
            if !args.dry_run {
                save_run(config, &record(None, Some(message.clone()))).ok();
            }
            dispatch::dispatch_all(&Notification::for_failure(&message), &targets).await;
            Err(e)
        }
    }
}

fn save_run(config: &LegionsConfig, record: &RunRecord) -> Result<()> {
    let db = OutreachDb::open(&config.database_path())?;
    db.record_run(record)?;
    Ok(())
}

async fn run_once(config: &LegionsConfig, dry_run: bool) -> Result<RunSummary> {
    if let Some(tz) = &config.follow_up.timezone {
        gate::resolve_timezone(Some(tz.as_str()))
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{tz}': {e}"))?;
    }

    let db = OutreachDb::open(&config.database_path())
        .with_context(|| format!("opening {}", config.database_path().display()))?;

    // Dry runs write nothing, not even the lease.
    let lease = if dry_run {
        None
    } else {
        Some(RunLease::acquire(&db, config.sending.lease_ttl_secs)?)
    };

    let json_log;
    let log: &dyn SendLog = if config.sending.send_log == "json" {
        let path = PathBuf::from(shellexpand::tilde(&config.sending.send_log_path).to_string());
        json_log = JsonSendLog::open(&path)?;
        &json_log
    } else {
        &db
    };

    let generator = legions_providers::create_generator(&config.content)?;
    let transport: Box<dyn MailTransport> = if dry_run && config.smtp.host.trim().is_empty() {
        Box::new(DisabledMailer)
    } else {
        Box::new(SmtpMailer::new(&config.smtp)?)
    };

    let collaborators = Collaborators {
        book: &db,
        log,
        suppression: &db,
        rates: &db,
        generator: generator.as_ref(),
        transport: transport.as_ref(),
        lease: lease.as_ref(),
    };
    let options = RunOptions::from_config(config, dry_run);
    let summary = pipeline::run(&collaborators, &options, Utc::now()).await?;
    Ok(summary)
}

// ─── roster & suppression ─────────────────────────────────────

fn cmd_import(config: &LegionsConfig, path: &Path) -> Result<()> {
    let parsed = Roster::load(path)?;
    let db = OutreachDb::open(&config.database_path())?;
    let report = roster::import(&db, &parsed, &config.business_hours)?;

    println!("📥 Imported {}", path.display());
    println!("   Clients:   {}", report.clients);
    println!("   Campaigns: {}", report.campaigns);
    println!("   Leads:     {} new, {} updated", report.leads_added, report.leads_updated);
    if !report.invalid.is_empty() {
        println!("   ⚠️  Skipped invalid addresses: {}", report.invalid.join(", "));
    }
    Ok(())
}

fn cmd_suppress(config: &LegionsConfig, email: &str, reason: &str) -> Result<()> {
    let kind: SuppressionKind = reason.parse()?;
    let db = OutreachDb::open(&config.database_path())?;
    let updated = db.suppress(email, kind)?;
    println!("🚫 {email} suppressed ({}), {updated} lead(s) updated", kind.as_str());
    Ok(())
}

// ─── inspection ───────────────────────────────────────────────

fn cmd_status(config: &LegionsConfig, email: &str) -> Result<()> {
    let db = OutreachDb::open(&config.database_path())?;
    let json_log;
    let log: &dyn SendLog = if config.sending.send_log == "json" {
        let path = PathBuf::from(shellexpand::tilde(&config.sending.send_log_path).to_string());
        json_log = JsonSendLog::open(&path)?;
        &json_log
    } else {
        &db
    };

    let leads = db.leads_by_email(email)?;
    if leads.is_empty() {
        println!("No lead with address {email}");
        return Ok(());
    }

    let now = Utc::now();
    for lead in leads {
        let report = pipeline::inspect_lead(log, &db, lead, &config.follow_up, now)?;
        println!(
            "📇 {} ({}) campaign {} status {}",
            report.lead.email,
            report.lead.id,
            report.lead.campaign_id,
            report.lead.status.as_str()
        );
        for event in &report.history {
            println!(
                "   {}  {:<9} {}",
                event.sent_at.format("%Y-%m-%d %H:%M UTC"),
                event.label.as_str(),
                event.message_id.as_deref().unwrap_or("-")
            );
        }
        println!("   next: {}", serde_json::to_string(&report.decision)?);
    }
    Ok(())
}

fn cmd_history(config: &LegionsConfig, limit: usize) -> Result<()> {
    let db = OutreachDb::open(&config.database_path())?;
    let runs = db.recent_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    for run in runs {
        let outcome = match (&run.summary, &run.error) {
            (_, Some(error)) => format!("❌ {error}"),
            (Some(summary), None) => summary.render().lines().next().unwrap_or_default().to_string(),
            (None, None) => "-".to_string(),
        };
        println!(
            "{}  {:>5}s  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            (run.finished_at - run.started_at).num_seconds(),
            outcome
        );
    }
    Ok(())
}

fn cmd_init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(LegionsConfig::default_path);
    if path.exists() && !force {
        println!("⚠️  {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    LegionsConfig::default().save_to(&path)?;
    println!("✅ Config written to {}", path.display());
    println!("   Set smtp.host and OPENAI_API_KEY, then: legions import roster.json");
    Ok(())
}
