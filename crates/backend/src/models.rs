// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

/// OAuth credential for one (user, provider) pair.
///
/// Kept out of `shared-types` so tokens never travel through API payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// `None` means the provider gave no expiry; the token is trusted as-is
    pub expires_at: Option<DateTime<Utc>>,
}

/// Database representation of oauth_credentials
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::oauth_credentials)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CredentialRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        Credential {
            user_id: row.user_id,
            provider: row.provider,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            id_token: row.id_token,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// Insertable struct for newly ingested newsletters
#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = crate::schema::ingested_newsletters)]
pub struct NewIngestedNewsletter {
    pub user_id: Uuid,
    pub sender_email: String,
    pub subject: String,
    pub from_display: String,
    pub date: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub plain_text: Option<String>,
    pub html_content: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl NewIngestedNewsletter {
    /// The application-level uniqueness key for stored newsletters.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            subject: self.subject.clone(),
            date: self.date.clone(),
        }
    }
}

/// `(subject, date)` half of the dedup key; user and sender are implied by
/// the per-sender batch the key is checked in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub subject: String,
    pub date: String,
}
