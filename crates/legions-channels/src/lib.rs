//! # Legions Channels
//!
//! Outbound mail delivery behind the `MailTransport` trait.

pub mod email;

pub use email::{DisabledMailer, SmtpMailer};
