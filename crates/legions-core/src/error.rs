//! Error types shared by every Legions crate.

use thiserror::Error;

/// Result alias using [`LegionsError`].
pub type Result<T> = std::result::Result<T, LegionsError>;

/// Main error type.
///
/// Only run-level failures travel through this type. Per-lead outcomes
/// (suppression, missed windows, dispatch failures) are recorded in the run
/// summary instead of being raised.
#[derive(Error, Debug)]
pub enum LegionsError {
    /// Configuration could not be read, parsed or validated.
    #[error("Config error: {0}")]
    Config(String),

    /// The state store (SQLite or JSON send log) failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Another run holds the send lease.
    #[error("Run already in progress (lease held by {holder} until {expires_at})")]
    LeaseHeld { holder: String, expires_at: String },

    /// This run's lease was taken over while it was still sending.
    #[error("Run lease lost (now held by {holder})")]
    LeaseLost { holder: String },

    /// HTTP-level failure talking to a collaborator.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Content provider returned an error or an unusable response.
    #[error("Provider error: {0}")]
    Provider(String),

    /// API key required but not configured.
    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    /// Mail transport could not be built (bad relay, bad address).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Roster or lead data is invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LegionsError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }
}
