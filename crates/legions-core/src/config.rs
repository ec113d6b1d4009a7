//! Legions configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LegionsError, Result};
use crate::types::FollowUpConfig;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegionsConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub follow_up: FollowUpConfig,
    #[serde(default)]
    pub sending: SendingConfig,
    #[serde(default)]
    pub business_hours: BusinessHoursDefaults,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_database() -> String { "~/.legions/legions.db".into() }

impl Default for LegionsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            follow_up: FollowUpConfig::default(),
            sending: SendingConfig::default(),
            business_hours: BusinessHoursDefaults::default(),
            smtp: SmtpConfig::default(),
            content: ContentConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl LegionsConfig {
    /// Load config from the default path (~/.legions/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("📄 No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LegionsError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LegionsError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("📄 Config loaded from {}", path.display());
        Ok(config)
    }

    /// Save config to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LegionsError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Legions home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".legions")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database).to_string())
    }

    /// Fill empty secrets from the environment.
    pub fn apply_env(&mut self) {
        if self.content.api_key.is_empty() {
            if let Some(key) = self
                .content
                .api_key_env
                .iter()
                .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
            {
                self.content.api_key = key;
            }
        }
        if self.smtp.password.is_empty() {
            if let Ok(pw) = std::env::var("LEGIONS_SMTP_PASSWORD") {
                self.smtp.password = pw;
            }
        }
        if self.notify.telegram_bot_token.is_empty() {
            if let Ok(token) = std::env::var("LEGIONS_TELEGRAM_BOT_TOKEN") {
                self.notify.telegram_bot_token = token;
            }
        }
    }

    /// Reject malformed settings. A malformed config aborts the run.
    pub fn validate(&self) -> Result<()> {
        self.follow_up.validate()?;
        self.business_hours.validate()?;
        if self.sending.default_daily_cap == 0 {
            return Err(LegionsError::config("sending.default_daily_cap must be > 0"));
        }
        if self.sending.send_log != "sqlite" && self.sending.send_log != "json" {
            return Err(LegionsError::config(format!(
                "sending.send_log must be \"sqlite\" or \"json\", got \"{}\"",
                self.sending.send_log
            )));
        }
        Ok(())
    }
}

/// Send-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingConfig {
    /// Cap for clients that don't set their own.
    #[serde(default = "default_daily_cap")]
    pub default_daily_cap: u32,
    /// Random extra pause added to `follow_up.min_send_interval_secs`.
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
    /// Upper bound on one content-generation or transport call.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
    /// Send-log backend: "sqlite" or "json".
    #[serde(default = "default_send_log")]
    pub send_log: String,
    /// JSON send-log path (used when send_log = "json").
    #[serde(default = "default_send_log_path")]
    pub send_log_path: String,
    /// Run lease lifetime, renewed before every dispatch. A crashed run blocks
    /// others for at most this long.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

fn default_daily_cap() -> u32 { 50 }
fn default_jitter() -> u64 { 15 }
fn default_dispatch_timeout() -> u64 { 60 }
fn default_send_log() -> String { "sqlite".into() }
fn default_send_log_path() -> String { "~/.legions/emails-sent.json".into() }
fn default_lease_ttl() -> u64 { 3600 }

impl Default for SendingConfig {
    fn default() -> Self {
        Self {
            default_daily_cap: default_daily_cap(),
            jitter_secs: default_jitter(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            send_log: default_send_log(),
            send_log_path: default_send_log_path(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

/// Window applied to clients whose own policy leaves hours unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursDefaults {
    #[serde(default = "default_start")]
    pub start_hour: u32,
    #[serde(default = "default_end")]
    pub end_hour: u32,
    #[serde(default)]
    pub skip_weekends: bool,
}

fn default_start() -> u32 { 9 }
fn default_end() -> u32 { 17 }

impl Default for BusinessHoursDefaults {
    fn default() -> Self {
        Self {
            start_hour: default_start(),
            end_hour: default_end(),
            skip_weekends: false,
        }
    }
}

impl BusinessHoursDefaults {
    pub fn validate(&self) -> Result<()> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(LegionsError::config(format!(
                "business_hours must satisfy start < end <= 24, got [{}, {})",
                self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// STARTTLS relay (true) or plain connection for local relays (false).
    #[serde(default = "bool_true")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 { 587 }
fn bool_true() -> bool { true }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            starttls: true,
        }
    }
}

/// Content-generation provider settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String { "openai".into() }
fn default_base_url() -> String { "https://api.openai.com/v1".into() }
fn default_api_key_env() -> Vec<String> { vec!["OPENAI_API_KEY".into()] }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 600 }

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Where run summaries are reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
    #[serde(default)]
    pub webhook_url: String,
}
