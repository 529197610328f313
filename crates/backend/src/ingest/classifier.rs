//! Newsletter detection from message headers.
//!
//! A message is a newsletter when any one of three signals fires:
//!
//! 1. an unsubscribe header is present (`List-Unsubscribe` or `Unsubscribe`,
//!    exact and case-sensitive header name)
//! 2. the `From` value mentions a known bulk-mail sending domain
//! 3. the lowercased `Subject` contains a newsletter phrase
//!
//! There are no exclusion rules; the user curates subscriptions afterwards.

use super::message::{find_header, Header};

/// Header names whose mere presence marks bulk mail.
pub const UNSUBSCRIBE_HEADERS: &[&str] = &["List-Unsubscribe", "Unsubscribe"];

/// Sending infrastructure used almost exclusively for newsletters.
pub const NEWSLETTER_DOMAINS: &[&str] = &[
    "substack.com",
    "beehiiv.com",
    "mailchimp.com",
    "mcsv.net",
    "list-manage.com",
    "convertkit.com",
    "ck.page",
    "buttondown.email",
    "ghost.io",
    "mailerlite.com",
    "sendgrid.net",
    "createsend.com",
    "campaign-archive.com",
    "constantcontact.com",
    "revue.email",
    "mailjet.com",
];

/// Matched against the lowercased subject.
pub const NEWSLETTER_PHRASES: &[&str] = &[
    "newsletter",
    "unsubscribe",
    "view in browser",
    "view this email in your browser",
    "weekly digest",
    "daily digest",
    "weekly roundup",
    "this week in",
    "issue #",
];

/// Which signal classified a message; the first one that fired wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsletterSignal {
    UnsubscribeHeader,
    SenderDomain,
    SubjectPhrase,
}

pub fn newsletter_signal(headers: &[Header]) -> Option<NewsletterSignal> {
    if headers
        .iter()
        .any(|h| UNSUBSCRIBE_HEADERS.contains(&h.name.as_str()))
    {
        return Some(NewsletterSignal::UnsubscribeHeader);
    }

    if let Some(from) = find_header(headers, "From") {
        let from = from.to_lowercase();
        if NEWSLETTER_DOMAINS.iter().any(|domain| from.contains(domain)) {
            return Some(NewsletterSignal::SenderDomain);
        }
    }

    if let Some(subject) = find_header(headers, "Subject") {
        let subject = subject.to_lowercase();
        if NEWSLETTER_PHRASES
            .iter()
            .any(|phrase| subject.contains(phrase))
        {
            return Some(NewsletterSignal::SubjectPhrase);
        }
    }

    None
}

pub fn is_newsletter(headers: &[Header]) -> bool {
    newsletter_signal(headers).is_some()
}
