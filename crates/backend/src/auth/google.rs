//! Google OAuth endpoints: consent URL, code exchange, token refresh.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::types::AuthConfig;
use crate::ingest::{OAuthClient, TokenGrant};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Login identity plus read-only mailbox access.
const SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/gmail.readonly",
];

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
}

impl From<GoogleTokenResponse> for TokenGrant {
    fn from(response: GoogleTokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            expires_in: response.expires_in,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleOAuthClient {
    pub fn new(config: &AuthConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OAuth HTTP client")?;

        Ok(Self {
            http,
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.auth_redirect_uri.clone(),
        })
    }

    /// Consent screen URL requesting offline access, so a refresh token is issued.
    pub fn authorization_url(&self, csrf_state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&SCOPES.join(" ")),
            urlencoding::encode(csrf_state)
        )
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .await
        .context("Authorization code exchange failed")
    }

    pub async fn user_info(&self, access_token: &str) -> Result<GoogleUserInfo> {
        let response = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to get user info")?;

        if !response.status().is_success() {
            anyhow::bail!("User info request failed: {}", response.status());
        }

        response
            .json()
            .await
            .context("Invalid user info response")
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self.http.post(TOKEN_URL).form(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {}: {}", status, body);
        }

        let tokens: GoogleTokenResponse = response.json().await.context("Invalid token response")?;
        Ok(tokens.into())
    }
}

#[async_trait]
impl OAuthClient for GoogleOAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::test_config;

    #[test]
    fn test_authorization_url_requests_offline_gmail_access() {
        let client = GoogleOAuthClient::new(&test_config(), Duration::from_secs(5)).unwrap();
        let url = client.authorization_url("state-123");

        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains(&*urlencoding::encode("https://www.googleapis.com/auth/gmail.readonly")));
        assert!(url.contains(&*urlencoding::encode("http://localhost/api/auth/callback")));
    }

    #[test]
    fn test_refresh_response_without_refresh_token() {
        let json = r#"{"access_token":"ya29.new","expires_in":3599,"token_type":"Bearer"}"#;
        let grant: TokenGrant = serde_json::from_str::<GoogleTokenResponse>(json)
            .unwrap()
            .into();

        assert_eq!(grant.access_token, "ya29.new");
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_in, Some(3599));
    }
}
