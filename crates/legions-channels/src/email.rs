//! SMTP mail transport (async lettre).
//!
//! STARTTLS relay for real providers, plain SMTP for local relays and test
//! sinks. Every failure, including an unbuildable message, comes back as a
//! failed [`DispatchOutcome`].

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use legions_core::config::SmtpConfig;
use legions_core::error::{LegionsError, Result};
use legions_core::traits::MailTransport;
use legions_core::types::{DispatchOutcome, OutboundEmail};

pub struct SmtpMailer {
    host: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(LegionsError::Config("smtp.host is not set".into()));
        }

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| LegionsError::Transport(format!("SMTP relay {}: {e}", config.host)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        tracing::debug!(
            "📮 SMTP transport ready: {}:{} ({})",
            config.host,
            config.port,
            if config.starttls { "starttls" } else { "plain" }
        );
        Ok(Self {
            host: config.host.clone(),
            transport: builder.build(),
        })
    }
}

fn mailbox(addr: &str, what: &str) -> std::result::Result<Mailbox, String> {
    addr.parse().map_err(|e| format!("Invalid {what} '{addr}': {e}"))
}

/// Domain part used for generated Message-IDs.
fn id_domain(from: &str) -> &str {
    from.rsplit_once('@').map(|(_, d)| d).unwrap_or("localhost")
}

/// Build the RFC 5322 message. Returns it with its Message-ID.
pub fn build_message(email: &OutboundEmail) -> std::result::Result<(Message, String), String> {
    let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), id_domain(&email.from.email));

    let mut builder = Message::builder()
        .from(mailbox(&email.from.mailbox(), "from")?)
        .to(mailbox(&email.to, "to")?)
        .subject(email.subject.as_str())
        .message_id(Some(message_id.clone()))
        .header(ContentType::TEXT_PLAIN);

    if let Some(reply_to) = &email.from.reply_to {
        builder = builder.reply_to(mailbox(reply_to, "reply-to")?);
    }

    let message = builder
        .body(email.body.clone())
        .map_err(|e| format!("Build email: {e}"))?;
    Ok((message, message_id))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutboundEmail) -> DispatchOutcome {
        let (message, message_id) = match build_message(email) {
            Ok(built) => built,
            Err(e) => return DispatchOutcome::failed(e),
        };

        match self.transport.send(message).await {
            Ok(_) => {
                tracing::debug!("📤 Email accepted by {} for {}", self.host, email.to);
                DispatchOutcome::sent(Some(message_id))
            }
            Err(e) => DispatchOutcome::failed(format!("SMTP send: {e}")),
        }
    }
}

/// Stand-in when no relay is configured (dry runs). Every send fails.
pub struct DisabledMailer;

#[async_trait]
impl MailTransport for DisabledMailer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn send(&self, email: &OutboundEmail) -> DispatchOutcome {
        tracing::warn!("⚠️ No SMTP relay configured, not sending to {}", email.to);
        DispatchOutcome::failed("no SMTP relay configured")
    }
}
