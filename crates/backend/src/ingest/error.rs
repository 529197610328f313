//! Error taxonomy for the ingestion pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Failure talking to the mail provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("unexpected provider payload: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Transport(_) => {
                true
            }
            ProviderError::Status { status, .. } => *status >= 500,
            ProviderError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by the token refresher, sender directory and sync engine.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no {provider} credential stored for user {user_id}")]
    NoCredential { user_id: Uuid, provider: String },

    #[error("access token expired and no refresh token is stored")]
    RefreshUnavailable,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl IngestError {
    /// Credential-class failures: the user has to link their account again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            IngestError::NoCredential { .. }
                | IngestError::RefreshUnavailable
                | IngestError::RefreshFailed(_)
        )
    }

    /// Provider hiccups worth another attempt on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Provider(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_require_reauth() {
        let no_credential = IngestError::NoCredential {
            user_id: Uuid::nil(),
            provider: "google".to_string(),
        };
        assert!(no_credential.requires_reauth());
        assert!(IngestError::RefreshUnavailable.requires_reauth());
        assert!(IngestError::RefreshFailed("invalid_grant".to_string()).requires_reauth());
    }

    #[test]
    fn test_provider_and_store_errors_do_not_require_reauth() {
        assert!(!IngestError::Provider(ProviderError::Timeout).requires_reauth());
        assert!(!IngestError::Store(anyhow::anyhow!("pool closed")).requires_reauth());
    }

    #[test]
    fn test_retryable_provider_errors() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Status {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Decode("missing id".to_string()).is_retryable());

        assert!(IngestError::Provider(ProviderError::RateLimited).is_retryable());
        assert!(!IngestError::RefreshUnavailable.is_retryable());
        assert!(!IngestError::Store(anyhow::anyhow!("pool closed")).is_retryable());
    }
}
