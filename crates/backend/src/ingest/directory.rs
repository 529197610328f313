//! Newsletter sender discovery.
//!
//! Scans recent mail with header-only fetches, keeps the messages the
//! classifier accepts, and turns their `From` headers into subscription
//! choices.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use shared_types::DiscoveredSender;
use uuid::Uuid;

use super::classifier::is_newsletter;
use super::config::DiscoveryConfig;
use super::error::IngestError;
use super::extract::{email_domain, is_valid_email, parse_from_header};
use super::message::{MessageFormat, RawMessage};
use super::provider::MailProvider;
use super::query::discovery_query;
use super::tokens::TokenRefresher;
use crate::repository::SenderStore;

/// Metadata fetches in flight at once during a scan.
const METADATA_CONCURRENCY: usize = 8;

pub struct SenderDirectory {
    refresher: Arc<TokenRefresher>,
    provider: Arc<dyn MailProvider>,
    senders: Arc<dyn SenderStore>,
    config: DiscoveryConfig,
}

impl SenderDirectory {
    pub fn new(
        refresher: Arc<TokenRefresher>,
        provider: Arc<dyn MailProvider>,
        senders: Arc<dyn SenderStore>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            refresher,
            provider,
            senders,
            config,
        }
    }

    pub fn default_max_scan(&self) -> u32 {
        self.config.max_scan
    }

    /// Distinct `(name, email)` senders among the user's recent newsletters,
    /// sorted by domain. Each one is also recorded in the sender catalog.
    pub async fn discover_senders(
        &self,
        user_id: Uuid,
        max_scan: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DiscoveredSender>, IngestError> {
        if max_scan == 0 {
            return Ok(Vec::new());
        }

        let access_token = self.refresher.get_valid_access_token(user_id, now).await?;
        let query = discovery_query(now, self.config.recency_days);
        let ids = self
            .provider
            .list_messages(&access_token, &query, max_scan)
            .await?;

        tracing::debug!("Discovery scan for user {}: {} messages", user_id, ids.len());

        let token = access_token.as_str();
        let messages: Vec<RawMessage> = stream::iter(ids)
            .map(|id| async move {
                match self
                    .provider
                    .get_message(token, &id, MessageFormat::Metadata)
                    .await
                {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!("Discovery: skipping message {}: {}", id, e);
                        None
                    }
                }
            })
            .buffer_unordered(METADATA_CONCURRENCY)
            .filter_map(|message| async move { message })
            .collect()
            .await;

        let discovered = collect_senders(&messages);

        for sender in &discovered {
            self.senders
                .upsert_discovered(&sender.name, &sender.email, &sender.domain, now)
                .await?;
        }

        tracing::info!(
            "Discovered {} newsletter senders for user {} ({} messages scanned)",
            discovered.len(),
            user_id,
            messages.len()
        );

        Ok(discovered)
    }
}

/// Newsletter senders with a well-formed address, deduplicated on
/// `(name, email)` and sorted by domain, then email, then name.
///
/// A sender without a display name is listed under its address.
pub fn collect_senders(messages: &[RawMessage]) -> Vec<DiscoveredSender> {
    let mut seen = HashSet::new();
    let mut senders = Vec::new();

    for message in messages {
        if !is_newsletter(&message.headers) {
            continue;
        }
        let Some(from) = message.header("From") else {
            continue;
        };

        let address = parse_from_header(from);
        if !is_valid_email(&address.email) {
            tracing::debug!("Discovery: discarding malformed sender {:?}", from);
            continue;
        }

        let name = address.name.unwrap_or_else(|| address.email.clone());
        if !seen.insert((name.clone(), address.email.clone())) {
            continue;
        }

        senders.push(DiscoveredSender {
            domain: email_domain(&address.email),
            name,
            email: address.email,
        });
    }

    senders.sort_by(|a, b| {
        a.domain
            .cmp(&b.domain)
            .then_with(|| a.email.cmp(&b.email))
            .then_with(|| a.name.cmp(&b.name))
    });
    senders
}
