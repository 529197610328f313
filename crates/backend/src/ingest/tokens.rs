//! Access-token freshness for provider calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::error::IngestError;
use super::locks::KeyedLocks;
use crate::models::Credential;
use crate::repository::CredentialStore;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Token endpoint response, normalized across grant types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Providers commonly omit this on refresh
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait OAuthClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenGrant>;
}

/// Expiring now, already expired, or inside the refresh margin. A credential
/// without an expiry never needs a refresh.
pub fn needs_refresh(credential: &Credential, now: DateTime<Utc>) -> bool {
    match credential.expires_at {
        Some(expires_at) => expires_at - now <= Duration::seconds(REFRESH_MARGIN_SECS),
        None => false,
    }
}

/// Fold a fresh grant into the stored credential. Refresh and id tokens the
/// grant does not carry are kept from `previous`.
pub fn merge_grant(
    previous: Option<Credential>,
    user_id: Uuid,
    provider: &str,
    grant: TokenGrant,
    now: DateTime<Utc>,
) -> Credential {
    let (previous_refresh, previous_id) = previous
        .map(|c| (c.refresh_token, c.id_token))
        .unwrap_or_default();

    Credential {
        user_id,
        provider: provider.to_string(),
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.or(previous_refresh),
        id_token: grant.id_token.or(previous_id),
        expires_at: grant.expires_in.map(|secs| now + Duration::seconds(secs)),
    }
}

pub struct TokenRefresher {
    store: Arc<dyn CredentialStore>,
    oauth: Arc<dyn OAuthClient>,
    provider: String,
    locks: KeyedLocks<(Uuid, String)>,
}

impl TokenRefresher {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        oauth: Arc<dyn OAuthClient>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            store,
            oauth,
            provider: provider.into(),
            locks: KeyedLocks::new(),
        }
    }

    /// Return an access token valid at `now`, refreshing and persisting it
    /// first when it is about to expire.
    ///
    /// Refreshes are serialized per credential and the stored row is read
    /// under the lock, so a token refreshed by a concurrent caller is reused.
    /// Refresh failures are returned as-is; nothing here retries.
    pub async fn get_valid_access_token(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String, IngestError> {
        let _guard = self.locks.lock(&(user_id, self.provider.clone())).await;

        let credential = self
            .store
            .get(user_id, &self.provider)
            .await?
            .ok_or_else(|| IngestError::NoCredential {
                user_id,
                provider: self.provider.clone(),
            })?;

        if !needs_refresh(&credential, now) {
            return Ok(credential.access_token);
        }

        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(IngestError::RefreshUnavailable)?;

        tracing::info!(
            "Refreshing {} access token for user {} (expires at {:?})",
            self.provider,
            user_id,
            credential.expires_at
        );

        let grant = self
            .oauth
            .refresh(&refresh_token)
            .await
            .map_err(|e| IngestError::RefreshFailed(format!("{:#}", e)))?;

        let refreshed = merge_grant(Some(credential), user_id, &self.provider, grant, now);
        let stored = self.store.upsert(&refreshed, now).await?;

        Ok(stored.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testing::{fixed_now, FakeOAuth, MemoryStore};

    const PROVIDER: &str = "google";

    fn credential(user_id: Uuid, expires_at: Option<DateTime<Utc>>) -> Credential {
        Credential {
            user_id,
            provider: PROVIDER.to_string(),
            access_token: "old-access".to_string(),
            refresh_token: Some("old-refresh".to_string()),
            id_token: None,
            expires_at,
        }
    }

    fn grant(refresh_token: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: "new-access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            id_token: None,
            expires_in: Some(3600),
        }
    }

    async fn setup(
        stored: Option<Credential>,
        oauth: FakeOAuth,
    ) -> (Arc<MemoryStore>, Arc<FakeOAuth>, TokenRefresher) {
        let store = Arc::new(MemoryStore::default());
        if let Some(c) = stored {
            store.upsert(&c, fixed_now()).await.unwrap();
        }
        let oauth = Arc::new(oauth);
        let refresher = TokenRefresher::new(store.clone(), oauth.clone(), PROVIDER);
        (store, oauth, refresher)
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let (_, _, refresher) = setup(None, FakeOAuth::granting(grant(None))).await;

        let err = refresher
            .get_valid_access_token(Uuid::new_v4(), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NoCredential { .. }));
        assert!(err.requires_reauth());
    }

    #[tokio::test]
    async fn test_expiring_within_margin_is_refreshed() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now + Duration::minutes(4)));
        let (store, oauth, refresher) = setup(Some(stored), FakeOAuth::granting(grant(None))).await;

        let token = refresher.get_valid_access_token(user, now).await.unwrap();

        assert_eq!(token, "new-access");
        assert_eq!(oauth.calls(), vec!["old-refresh".to_string()]);
        assert_eq!(store.credential_writes(), 2);
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now + Duration::minutes(10)));
        let (store, oauth, refresher) = setup(Some(stored), FakeOAuth::granting(grant(None))).await;

        let token = refresher.get_valid_access_token(user, now).await.unwrap();

        assert_eq!(token, "old-access");
        assert!(oauth.calls().is_empty());
        assert_eq!(store.credential_writes(), 1);
    }

    #[tokio::test]
    async fn test_margin_boundary_is_inclusive() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now + Duration::seconds(REFRESH_MARGIN_SECS)));
        let (_, oauth, refresher) = setup(Some(stored), FakeOAuth::granting(grant(None))).await;

        refresher.get_valid_access_token(user, now).await.unwrap();
        assert_eq!(oauth.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_expiry_is_trusted() {
        let user = Uuid::new_v4();
        let (_, oauth, refresher) =
            setup(Some(credential(user, None)), FakeOAuth::granting(grant(None))).await;

        let token = refresher
            .get_valid_access_token(user, fixed_now())
            .await
            .unwrap();
        assert_eq!(token, "old-access");
        assert!(oauth.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token_when_omitted() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now - Duration::minutes(1)));
        let (store, _, refresher) = setup(Some(stored), FakeOAuth::granting(grant(None))).await;

        refresher.get_valid_access_token(user, now).await.unwrap();

        let saved = store.get(user, PROVIDER).await.unwrap().unwrap();
        assert_eq!(saved.access_token, "new-access");
        assert_eq!(saved.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(saved.expires_at, Some(now + Duration::seconds(3600)));
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now));
        let (store, _, refresher) =
            setup(Some(stored), FakeOAuth::granting(grant(Some("rotated")))).await;

        refresher.get_valid_access_token(user, now).await.unwrap();

        let saved = store.get(user, PROVIDER).await.unwrap().unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let mut stored = credential(user, Some(now - Duration::hours(1)));
        stored.refresh_token = None;
        let (_, oauth, refresher) = setup(Some(stored), FakeOAuth::granting(grant(None))).await;

        let err = refresher.get_valid_access_token(user, now).await.unwrap_err();
        assert!(matches!(err, IngestError::RefreshUnavailable));
        assert!(oauth.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates_without_write() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now));
        let (store, oauth, refresher) = setup(Some(stored), FakeOAuth::failing("invalid_grant")).await;

        let err = refresher.get_valid_access_token(user, now).await.unwrap_err();

        assert!(matches!(err, IngestError::RefreshFailed(ref msg) if msg.contains("invalid_grant")));
        assert_eq!(oauth.calls().len(), 1);
        assert_eq!(store.credential_writes(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let stored = credential(user, Some(now));
        let (_, oauth, refresher) = setup(Some(stored), FakeOAuth::granting(grant(None))).await;
        let refresher = Arc::new(refresher);

        let (a, b) = tokio::join!(
            refresher.get_valid_access_token(user, now),
            refresher.get_valid_access_token(user, now)
        );

        assert_eq!(a.unwrap(), "new-access");
        assert_eq!(b.unwrap(), "new-access");
        assert_eq!(oauth.calls().len(), 1);
    }

    #[test]
    fn test_merge_grant_without_previous() {
        let now = fixed_now();
        let user = Uuid::new_v4();
        let merged = merge_grant(
            None,
            user,
            PROVIDER,
            TokenGrant {
                access_token: "a".to_string(),
                refresh_token: None,
                id_token: Some("id".to_string()),
                expires_in: None,
            },
            now,
        );

        assert_eq!(merged.refresh_token, None);
        assert_eq!(merged.id_token.as_deref(), Some("id"));
        assert_eq!(merged.expires_at, None);
    }
}
