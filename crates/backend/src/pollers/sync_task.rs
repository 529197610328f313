//! Newsletter sync background task.
//!
//! This module runs as a tokio background task within the backend process,
//! periodically syncing every user that holds an active subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use shared_types::NewsletterListQuery;
use uuid::Uuid;

use crate::ingest::config::env_or;
use crate::ingest::SyncEngine;
use crate::repository::SubscriptionStore;

/// Configuration for the sync polling task
#[derive(Debug, Clone)]
pub struct SyncPollerConfig {
    /// How often to look for users to sync (default: 15 minutes)
    pub poll_interval: Duration,
    /// Minimum seconds between background syncs per user
    pub rate_limit_secs: u64,
}

impl Default for SyncPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(900),
            rate_limit_secs: 300,
        }
    }
}

impl SyncPollerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_or("SYNC_POLL_INTERVAL_SECS", 900)),
            rate_limit_secs: env_or("SYNC_RATE_LIMIT_SECS", 300),
        }
    }
}

/// Tracks the last background sync per user
struct RateLimiter {
    last_sync: HashMap<Uuid, Instant>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            last_sync: HashMap::new(),
        }
    }

    fn can_sync(&self, user_id: &Uuid, rate_limit_secs: u64) -> bool {
        match self.last_sync.get(user_id) {
            Some(last) => last.elapsed().as_secs() >= rate_limit_secs,
            None => true,
        }
    }

    fn record_sync(&mut self, user_id: Uuid) {
        self.last_sync.insert(user_id, Instant::now());
    }
}

/// Start the newsletter sync background task
pub async fn start_sync_task(
    engine: Arc<SyncEngine>,
    subscriptions: Arc<dyn SubscriptionStore>,
    config: SyncPollerConfig,
) {
    tracing::info!(
        "Starting newsletter sync task (interval: {:?}, rate limit: {}s)",
        config.poll_interval,
        config.rate_limit_secs
    );

    let mut rate_limiter = RateLimiter::new();

    loop {
        if let Err(e) =
            run_sync_cycle(&engine, subscriptions.as_ref(), &config, &mut rate_limiter).await
        {
            tracing::error!("Newsletter sync cycle failed: {:#}", e);
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

async fn run_sync_cycle(
    engine: &SyncEngine,
    subscriptions: &dyn SubscriptionStore,
    config: &SyncPollerConfig,
    rate_limiter: &mut RateLimiter,
) -> Result<usize> {
    let users = subscriptions.users_with_active().await?;

    if users.is_empty() {
        tracing::debug!("No users with active subscriptions");
        return Ok(0);
    }

    tracing::debug!("Syncing newsletters for {} users", users.len());

    let mut total_stored = 0;
    for user_id in users {
        if !rate_limiter.can_sync(&user_id, config.rate_limit_secs) {
            tracing::debug!("Skipping user {} (rate limited)", user_id);
            continue;
        }

        // Only the stored count matters here; ask for an empty page
        let page = NewsletterListQuery {
            limit: Some(0),
            offset: None,
        };

        match engine
            .sync_subscribed_newsletters(user_id, Utc::now(), page)
            .await
        {
            Ok(outcome) => {
                if outcome.stored > 0 {
                    tracing::info!("Stored {} new newsletters for user {}", outcome.stored, user_id);
                }
                total_stored += outcome.stored;
            }
            Err(e) if e.requires_reauth() => {
                tracing::warn!("Skipping user {}: {}", user_id, e);
            }
            Err(e) if e.is_retryable() => {
                // Left unrecorded so the next cycle tries again
                tracing::warn!("Sync for user {} will be retried: {}", user_id, e);
                continue;
            }
            Err(e) => {
                tracing::error!("Failed to sync user {}: {}", user_id, e);
            }
        }

        rate_limiter.record_sync(user_id);
    }

    Ok(total_stored)
}
