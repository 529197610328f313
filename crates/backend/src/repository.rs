//! Storage traits consumed by the ingestion pipeline.
//!
//! The pipeline never touches a connection directly: it is handed
//! `Arc<dyn ...Store>` handles, implemented here by [`PgStore`] on top of the
//! `db` query modules and by in-memory fakes in tests.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{IngestedNewsletter, NewsletterSender, Subscription};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::models::{Credential, DedupKey, NewIngestedNewsletter};

/// Per-user, per-provider OAuth credentials with upsert semantics.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: Uuid, provider: &str) -> Result<Option<Credential>>;

    /// Insert or overwrite the single row for `(user_id, provider)`.
    async fn upsert(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Credential>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>>;

    /// Subscriptions with `subscribed = true`.
    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Subscription>>;

    async fn set(
        &self,
        user_id: Uuid,
        sender_email: &str,
        subscribed: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription>;

    /// Users holding at least one active subscription.
    async fn users_with_active(&self) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait SenderStore: Send + Sync {
    /// Insert if unseen, otherwise increment `email_count`.
    async fn upsert_discovered(
        &self,
        name: &str,
        email: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<NewsletterSender>;
}

#[async_trait]
pub trait NewsletterStore: Send + Sync {
    /// Stored newsletters for the user, newest first.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<IngestedNewsletter>>;

    async fn count_for_user(&self, user_id: Uuid) -> Result<usize>;

    /// Latest `sent_at` stored for `(user_id, sender_email)`.
    async fn watermark(&self, user_id: Uuid, sender_email: &str) -> Result<Option<DateTime<Utc>>>;

    /// Keys already stored for this sender, restricted to the given `date` values.
    async fn existing_keys(
        &self,
        user_id: Uuid,
        sender_email: &str,
        dates: &[String],
    ) -> Result<HashSet<DedupKey>>;

    async fn insert(&self, newsletter: &NewIngestedNewsletter) -> Result<IngestedNewsletter>;

    /// Returns `None` when the row does not exist or belongs to another user.
    async fn mark_read(&self, user_id: Uuid, newsletter_id: Uuid)
        -> Result<Option<IngestedNewsletter>>;
}

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get(&self, user_id: Uuid, provider: &str) -> Result<Option<Credential>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::credentials::get(&mut conn, user_id, provider).await
    }

    async fn upsert(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Credential> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::credentials::upsert(&mut conn, credential, now).await
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::subscriptions::list_for_user(&mut conn, user_id).await
    }

    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::subscriptions::list_active(&mut conn, user_id).await
    }

    async fn set(
        &self,
        user_id: Uuid,
        sender_email: &str,
        subscribed: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::subscriptions::set(&mut conn, user_id, sender_email, subscribed, now).await
    }

    async fn users_with_active(&self) -> Result<Vec<Uuid>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::subscriptions::list_users_with_active(&mut conn).await
    }
}

#[async_trait]
impl SenderStore for PgStore {
    async fn upsert_discovered(
        &self,
        name: &str,
        email: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<NewsletterSender> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::senders::upsert_discovered(&mut conn, name, email, domain, now).await
    }
}

#[async_trait]
impl NewsletterStore for PgStore {
    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<IngestedNewsletter>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::newsletters::list_for_user(&mut conn, user_id, limit, offset).await
    }

    async fn count_for_user(&self, user_id: Uuid) -> Result<usize> {
        let mut conn = db::get_conn(&self.pool).await?;
        let total = db::newsletters::count_for_user(&mut conn, user_id).await?;
        Ok(usize::try_from(total).unwrap_or_default())
    }

    async fn watermark(&self, user_id: Uuid, sender_email: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::newsletters::watermark(&mut conn, user_id, sender_email).await
    }

    async fn existing_keys(
        &self,
        user_id: Uuid,
        sender_email: &str,
        dates: &[String],
    ) -> Result<HashSet<DedupKey>> {
        if dates.is_empty() {
            return Ok(HashSet::new());
        }

        let mut conn = db::get_conn(&self.pool).await?;
        let keys = db::newsletters::existing_keys(&mut conn, user_id, sender_email, dates).await?;

        Ok(keys
            .into_iter()
            .map(|(subject, date)| DedupKey { subject, date })
            .collect())
    }

    async fn insert(&self, newsletter: &NewIngestedNewsletter) -> Result<IngestedNewsletter> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::newsletters::insert(&mut conn, newsletter).await
    }

    async fn mark_read(
        &self,
        user_id: Uuid,
        newsletter_id: Uuid,
    ) -> Result<Option<IngestedNewsletter>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::newsletters::mark_read(&mut conn, user_id, newsletter_id).await
    }
}
