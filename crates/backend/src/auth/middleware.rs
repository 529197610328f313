//! Authentication middleware layer for protecting routes.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::AppState;

use super::jwt;
use super::types::{AuthConfig, AuthUser, Claims};

/// Middleware function that requires authentication.
///
/// On success the resolved [`AuthUser`] is inserted into the request
/// extensions for handlers to pick up with `Extension<AuthUser>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.auth_config;

    let (user, claims) = match authenticate(request.headers(), config) {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };

    request.extensions_mut().insert(user);
    let response = next.run(request).await;

    // Slide the session forward once the token is a day old
    if jwt::should_refresh(&claims) {
        if let Some(Ok(new_token)) = jwt::claims_user(&claims)
            .map(|user| jwt::create_token(config, user.user_id, &user.email, user.name))
        {
            let cookie =
                build_auth_cookie(&config.cookie_name, &new_token, config.token_duration_days);
            let (mut parts, body) = response.into_parts();
            if let Ok(cookie_value) = cookie.parse() {
                parts.headers.insert(header::SET_COOKIE, cookie_value);
            }
            return Response::from_parts(parts, body);
        }
    }

    response
}

fn authenticate(headers: &HeaderMap, config: &AuthConfig) -> Result<(AuthUser, Claims), ApiError> {
    let token = extract_token_from_cookie(headers, &config.cookie_name)
        .or_else(|| extract_token_from_header(headers))
        .ok_or_else(|| ApiError::Unauthorized("Missing authentication".to_string()))?;

    let claims = jwt::validate_token(config, &token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    // Verify email is still allowed
    if !config.is_email_allowed(&claims.email) {
        return Err(ApiError::Forbidden("Email not authorized".to_string()));
    }

    let user = jwt::claims_user(&claims)
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    Ok((user, claims))
}

fn extract_token_from_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie_str in cookie_header.split(';') {
        if let Ok(cookie) = cookie::Cookie::parse(cookie_str.trim()) {
            if cookie.name() == cookie_name {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

/// Build an auth cookie string.
pub fn build_auth_cookie(name: &str, value: &str, days: i64) -> String {
    let max_age = days * 24 * 60 * 60;
    let secure = if std::env::var("RUST_ENV").unwrap_or_default() == "production" {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name, value, max_age, secure
    )
}

/// Extract and validate user from request headers.
///
/// Returns the authenticated user if the token is valid and email is allowed.
pub fn extract_auth_user(headers: &HeaderMap, config: &AuthConfig) -> Result<AuthUser, ApiError> {
    authenticate(headers, config).map(|(user, _)| user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::test_config;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    #[test]
    fn test_bearer_token_resolves_user() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = jwt::create_token(&config, user_id, "test@example.com", None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );

        let user = extract_auth_user(&headers, &config).unwrap();
        assert_eq!(user.user_id, user_id);
    }

    #[test]
    fn test_cookie_takes_precedence() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = jwt::create_token(&config, user_id, "test@example.com", None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; auth_token={}", token)).unwrap(),
        );
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer junk"));

        let user = extract_auth_user(&headers, &config).unwrap();
        assert_eq!(user.user_id, user_id);
    }

    #[test]
    fn test_missing_token_is_unauthorized() {
        let err = extract_auth_user(&HeaderMap::new(), &test_config()).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn test_email_removed_from_allowlist_is_forbidden() {
        let config = test_config();
        let token = jwt::create_token(&config, Uuid::new_v4(), "former@example.com", None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );

        let err = extract_auth_user(&headers, &config).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn test_cookie_format() {
        let cookie = build_auth_cookie("auth_token", "abc", 7);
        assert!(cookie.starts_with("auth_token=abc; Path=/; HttpOnly"));
        assert!(cookie.contains("Max-Age=604800"));
    }
}
