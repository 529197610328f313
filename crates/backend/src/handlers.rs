use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use shared_types::{
    DiscoveredSender, IngestedNewsletter, NewsletterListQuery, SenderDiscoveryQuery, Subscription,
    SyncResponse, ToggleSubscriptionRequest,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::ingest::extract::is_valid_email;
use crate::repository::{NewsletterStore, SubscriptionStore};
use crate::AppState;

/// Upper bound on a caller-supplied page size.
const MAX_PAGE_SIZE: i64 = 500;

/// Upper bound on a caller-supplied discovery scan.
const MAX_DISCOVERY_SCAN: u32 = 500;

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

fn validate_page(query: NewsletterListQuery) -> ApiResult<NewsletterListQuery> {
    if matches!(query.limit, Some(l) if !(0..=MAX_PAGE_SIZE).contains(&l)) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 0 and {}",
            MAX_PAGE_SIZE
        )));
    }
    if matches!(query.offset, Some(o) if o < 0) {
        return Err(ApiError::bad_request("offset must not be negative"));
    }
    Ok(query)
}

// Newsletter handlers
pub async fn sync_newsletters(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<NewsletterListQuery>,
) -> ApiResult<Json<SyncResponse>> {
    let page = validate_page(query)?;

    let outcome = state
        .sync
        .sync_subscribed_newsletters(user.user_id, Utc::now(), page)
        .await?;

    Ok(Json(SyncResponse {
        stored: outcome.stored,
        total: outcome.total,
        newsletters: outcome.newsletters,
    }))
}

pub async fn list_newsletters(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<NewsletterListQuery>,
) -> ApiResult<Json<Vec<IngestedNewsletter>>> {
    let page = validate_page(query)?;

    let newsletters = NewsletterStore::list_for_user(
        state.store.as_ref(),
        user.user_id,
        page.limit,
        page.offset,
    )
    .await?;

    Ok(Json(newsletters))
}

pub async fn mark_newsletter_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(newsletter_id): Path<Uuid>,
) -> ApiResult<Json<IngestedNewsletter>> {
    state
        .store
        .mark_read(user.user_id, newsletter_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Newsletter {}", newsletter_id)))
}

// Sender discovery
pub async fn discover_senders(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SenderDiscoveryQuery>,
) -> ApiResult<Json<Vec<DiscoveredSender>>> {
    let max_scan = query
        .max_scan
        .unwrap_or_else(|| state.directory.default_max_scan())
        .min(MAX_DISCOVERY_SCAN);

    let senders = state
        .directory
        .discover_senders(user.user_id, max_scan, Utc::now())
        .await?;

    Ok(Json(senders))
}

// Subscription handlers
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let subscriptions =
        SubscriptionStore::list_for_user(state.store.as_ref(), user.user_id).await?;
    Ok(Json(subscriptions))
}

pub async fn set_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<ToggleSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    let sender_email = normalize_sender_email(&payload.sender_email)?;

    let subscription = state
        .store
        .set(user.user_id, &sender_email, payload.subscribed, Utc::now())
        .await?;

    tracing::info!(
        "User {} {} {}",
        user.user_id,
        if payload.subscribed {
            "subscribed to"
        } else {
            "unsubscribed from"
        },
        sender_email
    );

    Ok(Json(subscription))
}

fn normalize_sender_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request(format!(
            "Invalid sender email: {}",
            raw
        )));
    }
    Ok(email)
}
