//! # Legions Providers
//!
//! Email content generation. Every supported backend speaks the OpenAI
//! chat-completions protocol and is handled by [`OpenAiContentGenerator`];
//! backends differ only in endpoint, auth style and API key.

pub mod openai_compatible;
pub mod registry;

pub use openai_compatible::OpenAiContentGenerator;

use legions_core::config::ContentConfig;
use legions_core::error::{LegionsError, Result};
use legions_core::traits::ContentGenerator;

/// Create the content generator named by `config.provider`.
pub fn create_generator(config: &ContentConfig) -> Result<Box<dyn ContentGenerator>> {
    match config.provider.as_str() {
        other if other.starts_with("custom:") => {
            Ok(Box::new(OpenAiContentGenerator::custom(other, config)))
        }
        name => {
            let registry = registry::get_provider_config(name).ok_or_else(|| {
                LegionsError::Config(format!(
                    "unknown content provider '{name}' (known: {}, or custom:<url>)",
                    registry::all_provider_names().join(", ")
                ))
            })?;
            Ok(Box::new(OpenAiContentGenerator::from_registry(registry, config)))
        }
    }
}
