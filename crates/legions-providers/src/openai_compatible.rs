//! Content generation over any OpenAI-compatible chat-completions API.
//!
//! The model is asked for a JSON object `{"subject": ..., "body": ...}`.
//! Anything else (HTTP failure, missing key, unparsable reply) is an error and
//! the send executor falls back to its template.

use async_trait::async_trait;
use serde_json::{Value, json};

use legions_core::config::ContentConfig;
use legions_core::error::{LegionsError, Result};
use legions_core::traits::ContentGenerator;
use legions_core::types::{Client, EmailContent, Lead, SequenceLabel};

use crate::registry::{AuthStyle, ProviderConfig};

const SYSTEM_PROMPT: &str = "You write short, plain-text B2B cold emails. \
No markdown, no links, no placeholders like [Name]. Under 120 words. \
Reply with a JSON object with exactly two string fields: \"subject\" and \"body\". \
The body starts with a greeting using the prospect's first name and ends with the sender's name.";

pub struct OpenAiContentGenerator {
    name: String,
    api_key: String,
    base_url: String,
    chat_path: String,
    auth_style: AuthStyle,
    json_mode: bool,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiContentGenerator {
    /// Known provider. API key: `config.api_key` first, then the provider's
    /// environment variables. A non-default `config.base_url` wins over the
    /// registry URL.
    pub fn from_registry(registry: &ProviderConfig, config: &ContentConfig) -> Self {
        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
                .unwrap_or_default()
        };

        let base_url = if !config.base_url.is_empty() && config.base_url != ContentConfig::default().base_url {
            config.base_url.trim_end_matches('/').to_string()
        } else {
            registry.base_url.to_string()
        };

        Self {
            name: registry.name.to_string(),
            api_key,
            base_url,
            chat_path: registry.chat_path.to_string(),
            auth_style: registry.auth_style,
            json_mode: registry.json_mode,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    /// Custom endpoint, e.g. `custom:https://llm.internal/v1`.
    pub fn custom(endpoint: &str, config: &ContentConfig) -> Self {
        let base_url = endpoint
            .strip_prefix("custom:")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();
        let auth_style = if config.api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Self {
            name: "custom".to_string(),
            api_key: config.api_key.clone(),
            base_url,
            chat_path: "/chat/completions".to_string(),
            auth_style,
            json_mode: false,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }

    fn request_body(&self, lead: &Lead, client: &Client, label: SequenceLabel) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(lead, client, label) },
            ],
        });
        if self.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

fn stage_brief(label: SequenceLabel) -> &'static str {
    match label {
        SequenceLabel::Initial => {
            "First email. Introduce the sender's company in one sentence, give one \
             reason it matters to the prospect, and ask a low-effort question."
        }
        SequenceLabel::Followup1 => {
            "First follow-up to an unanswered email. Two or three sentences, \
             add one new angle, do not repeat the first email."
        }
        SequenceLabel::Followup2 => {
            "Second follow-up. Offer a brief proof point or ask who the right \
             person to talk to would be."
        }
        SequenceLabel::Breakup => {
            "Last email of the sequence. Politely close the loop and leave the door open."
        }
    }
}

fn user_prompt(lead: &Lead, client: &Client, label: SequenceLabel) -> String {
    let sender = client.sender.name.as_deref().unwrap_or(&client.name);
    let mut prompt = format!(
        "Stage: {label}\n{}\n\nSender: {sender} at {}\nProspect first name: {}\nProspect email: {}",
        stage_brief(label),
        client.name,
        lead.first_name(),
        lead.email,
    );
    if let Some(company) = &lead.company {
        prompt.push_str(&format!("\nProspect company: {company}"));
    }
    if let Some(title) = &lead.title {
        prompt.push_str(&format!("\nProspect title: {title}"));
    }
    prompt
}

/// Parse the model reply. Tolerates a ```json fence around the object.
pub fn parse_content(raw: &str) -> Result<EmailContent> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let content: EmailContent = serde_json::from_str(unfenced)
        .map_err(|e| LegionsError::provider(format!("Unparsable content reply: {e}")))?;

    if content.subject.trim().is_empty() || content.body.trim().is_empty() {
        return Err(LegionsError::provider("Content reply has an empty subject or body"));
    }
    Ok(EmailContent {
        subject: content.subject.trim().to_string(),
        body: content.body.trim().to_string(),
    })
}

#[async_trait]
impl ContentGenerator for OpenAiContentGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        lead: &Lead,
        client: &Client,
        label: SequenceLabel,
    ) -> Result<EmailContent> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(LegionsError::ApiKeyMissing(self.name.clone()));
        }

        let url = format!("{}{}", self.base_url, self.chat_path);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(lead, client, label));
        let resp = self.apply_auth(req).send().await.map_err(|e| {
            LegionsError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LegionsError::Provider(format!(
                "{} API error {}: {}",
                self.name, status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| LegionsError::Http(e.to_string()))?;
        let raw = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| LegionsError::Provider("No choices in response".into()))?;

        let content = parse_content(raw)?;
        tracing::debug!("✍️ {} wrote {} for {}: \"{}\"", self.name, label, lead.email, content.subject);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::get_provider_config;
    use legions_core::types::SenderIdentity;

    fn client() -> Client {
        Client {
            id: "acme".into(),
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

    fn lead() -> Lead {
        let mut lead = Lead::new("camp", "ana@prospect.io");
        lead.name = Some("Ana Ruiz".into());
        lead.company = Some("Prospect Inc".into());
        lead
    }

    #[test]
    fn test_parse_plain_and_fenced() {
        let plain = r#"{"subject": " Quick idea ", "body": "Hi Ana,\n\nText\n\nRita"}"#;
        let content = parse_content(plain).unwrap();
        assert_eq!(content.subject, "Quick idea");

        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(parse_content(&fenced).unwrap(), content);
    }

    #[test]
    fn test_parse_rejects_bad_replies() {
        assert!(parse_content("Sure! Here is your email: ...").is_err());
        assert!(parse_content(r#"{"subject": "", "body": "x"}"#).is_err());
        assert!(parse_content(r#"{"subject": "x"}"#).is_err());
    }

    #[test]
    fn test_prompt_carries_lead_and_stage() {
        let prompt = user_prompt(&lead(), &client(), SequenceLabel::Breakup);
        assert!(prompt.contains("Stage: breakup"));
        assert!(prompt.contains("Prospect first name: Ana"));
        assert!(prompt.contains("Prospect company: Prospect Inc"));
        assert!(prompt.contains("Sender: Rita Rep at Acme Growth"));
    }

    #[test]
    fn test_request_body_json_mode() {
        let config = ContentConfig { api_key: "sk-test".into(), ..Default::default() };
        let openai = OpenAiContentGenerator::from_registry(get_provider_config("openai").unwrap(), &config);
        let body = openai.request_body(&lead(), &client(), SequenceLabel::Initial);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");

        let local = OpenAiContentGenerator::from_registry(get_provider_config("ollama").unwrap(), &config);
        assert!(local.request_body(&lead(), &client(), SequenceLabel::Initial).get("response_format").is_none());
        assert_eq!(local.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_custom_endpoint() {
        let config = ContentConfig::default();
        let custom = OpenAiContentGenerator::custom("custom:https://llm.internal/v1/", &config);
        assert_eq!(custom.base_url, "https://llm.internal/v1");
        assert_eq!(custom.auth_style, AuthStyle::None);
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let config = ContentConfig {
            api_key: String::new(),
            api_key_env: vec![],
            ..Default::default()
        };
        let mut registry = get_provider_config("openai").unwrap().clone();
        registry.env_keys = &["LEGIONS_TEST_UNSET_KEY"];
        let generator = OpenAiContentGenerator::from_registry(&registry, &config);
        let err = generator
            .generate(&lead(), &client(), SequenceLabel::Initial)
            .await
            .unwrap_err();
        assert!(matches!(err, LegionsError::ApiKeyMissing(_)));
    }
}
