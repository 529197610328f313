use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider name used for Google-issued OAuth credentials.
pub const GOOGLE_PROVIDER: &str = "google";

/// Stored newsletter struct matching database column order exactly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct IngestedNewsletter {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sender_email: String,
    pub subject: String,
    pub from_display: String,
    /// Provider-supplied `Date` header, verbatim
    pub date: String,
    /// `date` parsed to a timestamp when possible; drives the sync watermark
    pub sent_at: Option<DateTime<Utc>>,
    pub plain_text: Option<String>,
    /// HTML-derived body, either flattened text or raw markup depending on render mode
    pub html_content: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct NewsletterSender {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub domain: String,
    pub email_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sender_email: String,
    pub subscribed: bool,
    pub subscribed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A sender surfaced by a mailbox scan, offered to the user as a subscription choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSender {
    pub name: String,
    pub email: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleSubscriptionRequest {
    pub sender_email: String,
    pub subscribed: bool,
}

/// Pagination parameters accepted by the newsletter list endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderDiscoveryQuery {
    pub max_scan: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Rows inserted by this sync call
    pub stored: usize,
    /// Stored rows for the user, before pagination
    pub total: usize,
    pub newsletters: Vec<IngestedNewsletter>,
}

// ============================================================================
// Auth Types
// ============================================================================

/// Response from GET /api/auth/me
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// Response from GET /api/auth/login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInitResponse {
    pub auth_url: String,
}
