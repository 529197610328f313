use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager, ManagerConfig,
    },
    AsyncPgConnection, RunQueryDsl,
};
use shared_types::{IngestedNewsletter, NewsletterSender, Subscription};
use uuid::Uuid;

use crate::models::{Credential, CredentialRow, NewIngestedNewsletter, User};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // Set up rustls TLS configuration
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup =
        Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );
    let pool = Pool::builder(config).build()?;

    Ok(pool)
}

pub async fn get_conn(pool: &DbPool) -> anyhow::Result<Object<AsyncPgConnection>> {
    pool.get().await.context("Failed to get DB connection")
}

// User database operations
pub mod users {
    use super::*;

    /// Insert the user on first login, refresh the display name afterwards.
    pub async fn upsert_by_email(
        conn: &mut AsyncPgConnection,
        email_val: &str,
        name_val: Option<&str>,
    ) -> anyhow::Result<User> {
        use crate::schema::users::dsl::*;

        let user = diesel::insert_into(users)
            .values((email.eq(email_val), name.eq(name_val)))
            .on_conflict(email)
            .do_update()
            .set(name.eq(name_val))
            .returning(User::as_returning())
            .get_result(conn)
            .await?;

        Ok(user)
    }

    pub async fn get_by_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> anyhow::Result<Option<User>> {
        use crate::schema::users::dsl::*;

        let user = users
            .filter(id.eq(user_id))
            .select(User::as_select())
            .first(conn)
            .await
            .optional()?;

        Ok(user)
    }
}

// OAuth credential database operations
pub mod credentials {
    use super::*;

    pub async fn get(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        provider_name: &str,
    ) -> anyhow::Result<Option<Credential>> {
        use crate::schema::oauth_credentials::dsl::*;

        let row = oauth_credentials
            .filter(user_id.eq(user))
            .filter(provider.eq(provider_name))
            .select(CredentialRow::as_select())
            .first(conn)
            .await
            .optional()?;

        Ok(row.map(Into::into))
    }

    /// One row per (user, provider): insert, or overwrite every token field in place.
    pub async fn upsert(
        conn: &mut AsyncPgConnection,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Credential> {
        use crate::schema::oauth_credentials::dsl::*;

        let row = diesel::insert_into(oauth_credentials)
            .values((
                user_id.eq(credential.user_id),
                provider.eq(&credential.provider),
                access_token.eq(&credential.access_token),
                refresh_token.eq(credential.refresh_token.as_deref()),
                id_token.eq(credential.id_token.as_deref()),
                expires_at.eq(credential.expires_at),
                updated_at.eq(now),
            ))
            .on_conflict((user_id, provider))
            .do_update()
            .set((
                access_token.eq(&credential.access_token),
                refresh_token.eq(credential.refresh_token.as_deref()),
                id_token.eq(credential.id_token.as_deref()),
                expires_at.eq(credential.expires_at),
                updated_at.eq(now),
            ))
            .returning(CredentialRow::as_returning())
            .get_result(conn)
            .await?;

        Ok(row.into())
    }
}

// Newsletter sender database operations
pub mod senders {
    use super::*;

    /// Insert an unseen sender or bump the running count of a known one.
    pub async fn upsert_discovered(
        conn: &mut AsyncPgConnection,
        name_val: &str,
        email_val: &str,
        domain_val: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<NewsletterSender> {
        use crate::schema::newsletter_senders::dsl::*;

        let sender = diesel::insert_into(newsletter_senders)
            .values((
                name.eq(name_val),
                email.eq(email_val),
                domain.eq(domain_val),
                email_count.eq(1),
                created_at.eq(now),
                updated_at.eq(now),
            ))
            .on_conflict(email)
            .do_update()
            .set((
                name.eq(name_val),
                email_count.eq(email_count + 1),
                updated_at.eq(now),
            ))
            .get_result::<NewsletterSender>(conn)
            .await?;

        Ok(sender)
    }
}

// Subscription database operations
pub mod subscriptions {
    use super::*;

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        user: Uuid,
    ) -> anyhow::Result<Vec<Subscription>> {
        use crate::schema::subscriptions::dsl::*;

        let items = subscriptions
            .filter(user_id.eq(user))
            .order_by(sender_email.asc())
            .load::<Subscription>(conn)
            .await?;

        Ok(items)
    }

    pub async fn list_active(
        conn: &mut AsyncPgConnection,
        user: Uuid,
    ) -> anyhow::Result<Vec<Subscription>> {
        use crate::schema::subscriptions::dsl::*;

        let items = subscriptions
            .filter(user_id.eq(user))
            .filter(subscribed.eq(true))
            .order_by(sender_email.asc())
            .load::<Subscription>(conn)
            .await?;

        Ok(items)
    }

    pub async fn list_users_with_active(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<Uuid>> {
        use crate::schema::subscriptions::dsl::*;

        let ids = subscriptions
            .filter(subscribed.eq(true))
            .select(user_id)
            .distinct()
            .load::<Uuid>(conn)
            .await?;

        Ok(ids)
    }

    /// Upsert on (user_id, sender_email). `subscribed_at` moves only when
    /// the subscription is (re-)enabled.
    pub async fn set(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        email: &str,
        is_subscribed: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Subscription> {
        use crate::schema::subscriptions::dsl::*;

        let insert = diesel::insert_into(subscriptions).values((
            user_id.eq(user),
            sender_email.eq(email),
            subscribed.eq(is_subscribed),
            subscribed_at.eq(now),
            updated_at.eq(now),
        ));

        let subscription = if is_subscribed {
            insert
                .on_conflict((user_id, sender_email))
                .do_update()
                .set((
                    subscribed.eq(true),
                    subscribed_at.eq(now),
                    updated_at.eq(now),
                ))
                .get_result::<Subscription>(conn)
                .await?
        } else {
            insert
                .on_conflict((user_id, sender_email))
                .do_update()
                .set((subscribed.eq(false), updated_at.eq(now)))
                .get_result::<Subscription>(conn)
                .await?
        };

        Ok(subscription)
    }
}

// Ingested newsletter database operations
pub mod newsletters {
    use super::*;

    /// Newest first. Rows without a parsed date sort after dated ones.
    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> anyhow::Result<Vec<IngestedNewsletter>> {
        use crate::schema::ingested_newsletters::dsl::*;

        let mut query = ingested_newsletters
            .filter(user_id.eq(user))
            .order_by((sent_at.desc().nulls_last(), received_at.desc()))
            .into_boxed();

        if let Some(l) = limit {
            query = query.limit(l);
        }
        if let Some(o) = offset {
            query = query.offset(o);
        }

        let items = query.load::<IngestedNewsletter>(conn).await?;
        Ok(items)
    }

    pub async fn count_for_user(conn: &mut AsyncPgConnection, user: Uuid) -> anyhow::Result<i64> {
        use crate::schema::ingested_newsletters::dsl::*;

        let total = ingested_newsletters
            .filter(user_id.eq(user))
            .count()
            .get_result::<i64>(conn)
            .await?;

        Ok(total)
    }

    pub async fn watermark(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        sender: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        use crate::schema::ingested_newsletters::dsl::*;

        let latest = ingested_newsletters
            .filter(user_id.eq(user))
            .filter(sender_email.eq(sender))
            .select(diesel::dsl::max(sent_at))
            .first::<Option<DateTime<Utc>>>(conn)
            .await?;

        Ok(latest)
    }

    /// `(subject, date)` pairs already stored for this sender among the given dates.
    pub async fn existing_keys(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        sender: &str,
        dates: &[String],
    ) -> anyhow::Result<Vec<(String, String)>> {
        use crate::schema::ingested_newsletters::dsl::*;

        let keys = ingested_newsletters
            .filter(user_id.eq(user))
            .filter(sender_email.eq(sender))
            .filter(date.eq_any(dates))
            .select((subject, date))
            .load::<(String, String)>(conn)
            .await?;

        Ok(keys)
    }

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        new_newsletter: &NewIngestedNewsletter,
    ) -> anyhow::Result<IngestedNewsletter> {
        use crate::schema::ingested_newsletters::dsl::*;

        let row = diesel::insert_into(ingested_newsletters)
            .values(new_newsletter)
            .get_result::<IngestedNewsletter>(conn)
            .await?;

        Ok(row)
    }

    pub async fn mark_read(
        conn: &mut AsyncPgConnection,
        user: Uuid,
        newsletter_id: Uuid,
    ) -> anyhow::Result<Option<IngestedNewsletter>> {
        use crate::schema::ingested_newsletters::dsl::*;

        let row = diesel::update(
            ingested_newsletters
                .filter(id.eq(newsletter_id))
                .filter(user_id.eq(user)),
        )
        .set(is_read.eq(true))
        .get_result::<IngestedNewsletter>(conn)
        .await
        .optional()?;

        Ok(row)
    }
}
