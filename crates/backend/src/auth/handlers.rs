//! Authentication HTTP handlers.

use axum::extract::Query;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use shared_types::GOOGLE_PROVIDER;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::ingest::tokens::merge_grant;
use crate::repository::CredentialStore;
use crate::AppState;

use super::{
    build_auth_cookie, extract_auth_user, jwt,
    types::{AuthUserResponse, LoginInitResponse},
};

const STATE_COOKIE: &str = "oauth_state";

/// Start Google OAuth login flow.
///
/// Returns a URL that the frontend should redirect the user to, and pins the
/// CSRF state in a short-lived cookie checked by the callback.
pub async fn auth_login(State(state): State<AppState>) -> ApiResult<Response> {
    let csrf_state = uuid::Uuid::new_v4().to_string();
    let auth_url = state.oauth.authorization_url(&csrf_state);

    let state_cookie = format!(
        "{}={}; Path=/api/auth; HttpOnly; SameSite=Lax; Max-Age=600",
        STATE_COOKIE, csrf_state
    );

    Ok((
        [(header::SET_COOKIE, state_cookie)],
        Json(LoginInitResponse { auth_url }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackParams {
    pub code: String,
    pub state: String,
}

/// Handle Google OAuth callback.
///
/// Exchanges the authorization code for tokens, validates the user's email
/// against the allowlist, stores the mailbox credential and sets an auth
/// cookie on success.
pub async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuthCallbackParams>,
) -> Response {
    match handle_callback_inner(&state, &headers, params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Auth callback error: {:?}", e);
            Redirect::to("/?auth_error=auth_failed").into_response()
        }
    }
}

async fn handle_callback_inner(
    state: &AppState,
    headers: &HeaderMap,
    params: AuthCallbackParams,
) -> Result<Response, ApiError> {
    let config = &state.auth_config;

    if read_cookie(headers, STATE_COOKIE).as_deref() != Some(params.state.as_str()) {
        tracing::warn!("OAuth callback with mismatched state");
        return Ok(Redirect::to("/?auth_error=invalid_state").into_response());
    }

    let grant = match state.oauth.exchange_code(&params.code).await {
        Ok(grant) => grant,
        Err(e) => {
            tracing::error!("Token exchange failed: {:#}", e);
            return Ok(Redirect::to("/?auth_error=token_exchange_failed").into_response());
        }
    };

    let user_info = state.oauth.user_info(&grant.access_token).await?;
    let email = user_info.email.trim().to_lowercase();

    tracing::info!("OAuth login attempt from: {}", email);

    // Check if email is allowed
    if !config.is_email_allowed(&email) {
        tracing::warn!("Unauthorized login attempt from: {}", email);
        return Ok(Redirect::to("/?auth_error=unauthorized_email").into_response());
    }

    let user = {
        let mut conn = db::get_conn(&state.pool).await?;
        db::users::upsert_by_email(&mut conn, &email, user_info.name.as_deref()).await?
    };

    if grant.refresh_token.is_none() {
        tracing::warn!("No refresh token received for {}, keeping any stored one", email);
    }

    let now = Utc::now();
    let previous = state.store.get(user.id, GOOGLE_PROVIDER).await?;
    let credential = merge_grant(previous, user.id, GOOGLE_PROVIDER, grant, now);
    state.store.upsert(&credential, now).await?;

    let token = jwt::create_token(config, user.id, &user.email, user.name.clone())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to create token: {}", e)))?;

    let cookie = build_auth_cookie(&config.cookie_name, &token, config.token_duration_days);
    let clear_state = format!("{}=; Path=/api/auth; HttpOnly; SameSite=Lax; Max-Age=0", STATE_COOKIE);

    tracing::info!("Successful login for: {}", email);

    let mut response = (StatusCode::SEE_OTHER, [(header::LOCATION, "/")]).into_response();
    for value in [cookie, clear_state] {
        if let Ok(value) = value.parse() {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    Ok(response)
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie_header
        .split(';')
        .filter_map(|s| cookie::Cookie::parse(s.trim()).ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

/// Get current authenticated user info.
pub async fn auth_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<AuthUserResponse>> {
    let auth_user = extract_auth_user(&headers, &state.auth_config)?;

    let mut conn = db::get_conn(&state.pool).await?;
    let user = db::users::get_by_id(&mut conn, auth_user.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;

    Ok(Json(AuthUserResponse {
        user_id: user.id,
        email: user.email,
        name: user.name,
    }))
}

/// Logout - clear auth cookie.
pub async fn auth_logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        state.auth_config.cookie_name
    );

    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, "/".to_string()), (header::SET_COOKIE, cookie)],
    )
}
