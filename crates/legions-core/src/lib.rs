//! # Legions Core
//!
//! Shared vocabulary of the outreach scheduler: configuration, error type,
//! domain types (leads, campaigns, clients, send events) and the traits the
//! send pipeline uses to reach its collaborators.

pub mod config;
pub mod error;
pub mod templates;
pub mod traits;
pub mod types;

pub use config::LegionsConfig;
pub use error::{LegionsError, Result};
pub use traits::{ContentGenerator, LeadBook, MailTransport, RateStore, SendLog, SuppressionSource};
