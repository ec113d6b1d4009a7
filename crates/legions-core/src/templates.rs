//! Deterministic fallback templates used when content generation fails.
//! Same lead + client + label always renders the same email.

use crate::types::{Client, EmailContent, Lead, SequenceLabel};

/// Render the fallback email for a stage of the sequence.
pub fn fallback(lead: &Lead, client: &Client, label: SequenceLabel) -> EmailContent {
    let first = lead.first_name();
    let company = lead.company.as_deref().unwrap_or("your team");
    let sender = client.sender.name.as_deref().unwrap_or(&client.name);

    let (subject, body) = match label {
        SequenceLabel::Initial => (
            format!("Quick question for {company}"),
            format!(
                "Hi {first},\n\n\
                 I work with {client} and we help teams like {company} win more \
                 business without adding headcount.\n\n\
                 Would you be open to a 15-minute call next week to see if it's a fit?\n\n\
                 Best,\n{sender}",
                client = client.name,
            ),
        ),
        SequenceLabel::Followup1 => (
            format!("Re: Quick question for {company}"),
            format!(
                "Hi {first},\n\n\
                 Just bumping this to the top of your inbox in case it got buried. \
                 Is improving outbound results a priority for {company} this quarter?\n\n\
                 Best,\n{sender}"
            ),
        ),
        SequenceLabel::Followup2 => (
            format!("Re: Quick question for {company}"),
            format!(
                "Hi {first},\n\n\
                 I know things get busy. If now isn't the right time, who would be \
                 the best person at {company} to talk to about this?\n\n\
                 Thanks,\n{sender}"
            ),
        ),
        SequenceLabel::Breakup => (
            "Should I close your file?".to_string(),
            format!(
                "Hi {first},\n\n\
                 I haven't heard back, so I'll assume the timing isn't right and \
                 won't follow up again. If anything changes, just reply to this email.\n\n\
                 All the best,\n{sender}"
            ),
        ),
    };

    EmailContent { subject, body }
}
