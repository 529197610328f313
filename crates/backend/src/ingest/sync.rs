//! Incremental newsletter sync for one user.
//!
//! All state between runs lives in the stored newsletter rows: each sender's
//! watermark is recomputed from them on every run, and a run that stops
//! halfway resumes from whatever it managed to store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use shared_types::{IngestedNewsletter, NewsletterListQuery};
use uuid::Uuid;

use super::classifier::is_newsletter;
use super::config::SyncConfig;
use super::error::{IngestError, ProviderError};
use super::extract::extract_content;
use super::locks::KeyedLocks;
use super::message::{MessageFormat, RawMessage};
use super::provider::MailProvider;
use super::query::{sync_query, SenderWindow};
use super::tokens::TokenRefresher;
use crate::models::NewIngestedNewsletter;
use crate::repository::{NewsletterStore, SubscriptionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Rows inserted by this run
    pub stored: usize,
    /// Stored rows for the user after this run
    pub total: usize,
    /// The requested page of stored rows, newest first
    pub newsletters: Vec<IngestedNewsletter>,
}

#[derive(Debug, Default)]
struct SyncStats {
    listed: usize,
    fetched: usize,
    classified: usize,
    stored: usize,
    duplicates: usize,
    failed: usize,
    deferred: usize,
}

pub struct SyncEngine {
    refresher: Arc<TokenRefresher>,
    provider: Arc<dyn MailProvider>,
    subscriptions: Arc<dyn SubscriptionStore>,
    newsletters: Arc<dyn NewsletterStore>,
    config: SyncConfig,
    locks: KeyedLocks<Uuid>,
}

impl SyncEngine {
    pub fn new(
        refresher: Arc<TokenRefresher>,
        provider: Arc<dyn MailProvider>,
        subscriptions: Arc<dyn SubscriptionStore>,
        newsletters: Arc<dyn NewsletterStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            refresher,
            provider,
            subscriptions,
            newsletters,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Pull new mail from every subscribed sender, store what is new, and
    /// return the requested page of the user's stored newsletters.
    ///
    /// Only credential, listing and storage-read failures fail the run. A
    /// message that cannot be fetched or stored is logged and skipped.
    pub async fn sync_subscribed_newsletters(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        page: NewsletterListQuery,
    ) -> Result<SyncOutcome, IngestError> {
        let stored = {
            let _guard = self.locks.lock(&user_id).await;
            self.ingest(user_id, now).await?
        };

        let total = self.newsletters.count_for_user(user_id).await?;
        let newsletters = self
            .newsletters
            .list_for_user(user_id, page.limit, page.offset)
            .await?;

        Ok(SyncOutcome {
            stored,
            total,
            newsletters,
        })
    }

    async fn ingest(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<usize, IngestError> {
        let active = self.subscriptions.list_active(user_id).await?;
        if active.is_empty() {
            tracing::debug!("User {} has no active subscriptions, skipping sync", user_id);
            return Ok(0);
        }

        let mut windows = Vec::with_capacity(active.len());
        for subscription in &active {
            let watermark = self
                .newsletters
                .watermark(user_id, &subscription.sender_email)
                .await?;
            windows.push(SenderWindow {
                sender_email: subscription.sender_email.clone(),
                watermark,
            });
        }
        let subscribed: HashSet<&str> = active.iter().map(|s| s.sender_email.as_str()).collect();

        let access_token = self.refresher.get_valid_access_token(user_id, now).await?;
        let query = sync_query(&windows);
        let ids = self
            .provider
            .list_messages(&access_token, &query, self.config.max_results)
            .await?;

        let mut stats = SyncStats {
            listed: ids.len(),
            ..SyncStats::default()
        };

        let token = access_token.as_str();
        let fetched: Vec<(String, Result<RawMessage, ProviderError>)> = stream::iter(ids)
            .map(|id| async move {
                let result = self
                    .provider
                    .get_message(token, &id, MessageFormat::Full)
                    .await;
                (id, result)
            })
            .buffer_unordered(self.config.effective_concurrency())
            .collect()
            .await;

        // Candidates grouped per sender, each group deduplicated in one store round trip
        let mut batches: BTreeMap<String, Vec<NewIngestedNewsletter>> = BTreeMap::new();
        for (id, result) in fetched {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Sync for user {}: skipping message {}: {}", user_id, id, e);
                    stats.failed += 1;
                    continue;
                }
            };
            stats.fetched += 1;

            if !is_newsletter(&message.headers) {
                tracing::debug!("Message {} is not a newsletter", id);
                continue;
            }
            stats.classified += 1;

            let content = extract_content(&message, &self.config.extract);
            if !subscribed.contains(content.from_email.as_str()) {
                tracing::debug!(
                    "Message {} from {} matches no active subscription",
                    id,
                    content.from_email
                );
                continue;
            }

            batches
                .entry(content.from_email.clone())
                .or_default()
                .push(NewIngestedNewsletter {
                    user_id,
                    sender_email: content.from_email,
                    subject: content.subject,
                    from_display: content.from_display,
                    date: content.date,
                    sent_at: content.sent_at,
                    plain_text: content.plain_text,
                    html_content: content.html_content,
                    received_at: now,
                });
        }

        for (sender_email, candidates) in batches {
            self.store_batch(user_id, &sender_email, candidates, &mut stats)
                .await?;
        }

        tracing::info!(
            "Sync for user {}: listed {}, fetched {}, newsletters {}, stored {}, duplicates {}, failed {}, deferred {}",
            user_id,
            stats.listed,
            stats.fetched,
            stats.classified,
            stats.stored,
            stats.duplicates,
            stats.failed,
            stats.deferred
        );

        Ok(stats.stored)
    }

    /// Insert the candidates whose `(subject, date)` is neither stored nor
    /// repeated earlier in the batch.
    ///
    /// Inserts run oldest first. After the first failed insert the sender's
    /// newer candidates are deferred, so the watermark never moves past a
    /// message that was not stored and the next run fetches them again.
    async fn store_batch(
        &self,
        user_id: Uuid,
        sender_email: &str,
        mut candidates: Vec<NewIngestedNewsletter>,
        stats: &mut SyncStats,
    ) -> Result<(), IngestError> {
        candidates.sort_by_key(|c| (c.sent_at.is_none(), c.sent_at));

        let mut dates: Vec<String> = candidates.iter().map(|c| c.date.clone()).collect();
        dates.sort();
        dates.dedup();

        let mut seen = self
            .newsletters
            .existing_keys(user_id, sender_email, &dates)
            .await?;

        let mut blocked = false;
        for candidate in candidates {
            if !seen.insert(candidate.dedup_key()) {
                tracing::trace!(
                    "Skipping duplicate from {}: {:?} at {:?}",
                    sender_email,
                    candidate.subject,
                    candidate.date
                );
                stats.duplicates += 1;
                continue;
            }

            if blocked {
                stats.deferred += 1;
                continue;
            }

            match self.newsletters.insert(&candidate).await {
                Ok(_) => stats.stored += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to store newsletter {:?} from {}, deferring newer mail: {:#}",
                        candidate.subject,
                        sender_email,
                        e
                    );
                    stats.failed += 1;
                    blocked = true;
                }
            }
        }

        Ok(())
    }
}
