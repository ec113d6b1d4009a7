//! Known OpenAI-compatible endpoints.

/// How to attach auth credentials to requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Local servers.
    None,
}

/// Endpoint settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: &'static str,
    pub base_url: &'static str,
    pub chat_path: &'static str,
    /// Environment variables tried for the API key, in order.
    pub env_keys: &'static [&'static str],
    pub auth_style: AuthStyle,
    /// Whether the endpoint honours `response_format: json_object`.
    pub json_mode: bool,
}

static PROVIDERS: &[ProviderConfig] = &[
    ProviderConfig {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        chat_path: "/chat/completions",
        env_keys: &["OPENAI_API_KEY"],
        auth_style: AuthStyle::Bearer,
        json_mode: true,
    },
    ProviderConfig {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        chat_path: "/chat/completions",
        env_keys: &["OPENROUTER_API_KEY"],
        auth_style: AuthStyle::Bearer,
        json_mode: true,
    },
    ProviderConfig {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        chat_path: "/chat/completions",
        env_keys: &["GROQ_API_KEY"],
        auth_style: AuthStyle::Bearer,
        json_mode: true,
    },
    ProviderConfig {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        chat_path: "/chat/completions",
        env_keys: &["DEEPSEEK_API_KEY"],
        auth_style: AuthStyle::Bearer,
        json_mode: true,
    },
    ProviderConfig {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        chat_path: "/chat/completions",
        env_keys: &[],
        auth_style: AuthStyle::None,
        json_mode: false,
    },
];

pub fn get_provider_config(name: &str) -> Option<&'static ProviderConfig> {
    PROVIDERS.iter().find(|p| p.name == name)
}

pub fn all_provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}
