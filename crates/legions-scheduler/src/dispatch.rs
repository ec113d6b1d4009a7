//! Notification dispatch: Telegram Bot API and generic HTTP webhooks.

use legions_core::config::NotifyConfig;

use crate::notify::{Notification, NotifyPriority};

/// Where notifications go.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyTarget {
    /// Telegram Bot API `sendMessage`.
    Telegram { bot_token: String, chat_id: String },
    /// POST with a JSON body.
    Webhook { url: String },
}

impl NotifyTarget {
    pub fn name(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Webhook { .. } => "webhook",
        }
    }
}

/// Dispatch a notification to one target.
pub async fn dispatch(notification: &Notification, target: &NotifyTarget) -> Result<(), String> {
    match target {
        NotifyTarget::Telegram { bot_token, chat_id } => {
            send_telegram(bot_token, chat_id, notification).await
        }
        NotifyTarget::Webhook { url } => send_webhook(url, notification).await,
    }
}

fn telegram_text(notification: &Notification) -> String {
    let emoji = match notification.priority {
        NotifyPriority::Urgent => "🚨",
        NotifyPriority::High => "⚠️",
        NotifyPriority::Normal => "📢",
    };
    format!(
        "{} *{}*\n\n{}\n\n_{} • {}_",
        emoji,
        escape_markdown(&notification.title),
        escape_markdown(&notification.body),
        escape_markdown(&notification.source),
        notification.timestamp.format("%Y-%m-%d %H:%M UTC")
    )
}

async fn send_telegram(bot_token: &str, chat_id: &str, notification: &Notification) -> Result<(), String> {
    let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
    let resp = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({
            "chat_id": chat_id,
            "text": telegram_text(notification),
            "parse_mode": "Markdown"
        }))
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| format!("Telegram send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Telegram notification sent: {}", notification.title);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("Telegram API error {status}: {body}"))
    }
}

async fn send_webhook(url: &str, notification: &Notification) -> Result<(), String> {
    let resp = reqwest::Client::new()
        .post(url)
        .json(&serde_json::json!({
            "title": notification.title,
            "body": notification.body,
            "priority": notification.priority.as_str(),
            "source": notification.source,
            "timestamp": notification.timestamp.to_rfc3339(),
        }))
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| format!("Webhook send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Webhook notification sent to {url}: {}", notification.title);
        Ok(())
    } else {
        Err(format!("Webhook error {}", resp.status()))
    }
}

/// Escape Telegram Markdown (v1) special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

/// Send to every target; failures are logged and returned, never raised.
pub async fn dispatch_all(
    notification: &Notification,
    targets: &[NotifyTarget],
) -> Vec<(&'static str, Result<(), String>)> {
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let result = dispatch(notification, target).await;
        if let Err(e) = &result {
            tracing::warn!("⚠️ {} notification failed: {e}", target.name());
        }
        results.push((target.name(), result));
    }
    results
}

/// Targets with complete settings.
pub fn targets_from_config(config: &NotifyConfig) -> Vec<NotifyTarget> {
    let mut targets = Vec::new();
    if !config.telegram_bot_token.is_empty() && !config.telegram_chat_id.is_empty() {
        targets.push(NotifyTarget::Telegram {
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
        });
    }
    if !config.webhook_url.is_empty() {
        targets.push(NotifyTarget::Webhook { url: config.webhook_url.clone() });
    }
    targets
}
