//! Gmail REST API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::ingest::message::{MessageFormat, RawMessage, WireMessage};
use crate::ingest::{MailProvider, ProviderError};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail caps a single list page at 500 ids.
const MAX_PAGE_SIZE: u32 = 500;

/// Headers requested by metadata fetches; enough for classification and sender parsing.
const METADATA_HEADERS: &[&str] = &["From", "Subject", "Date", "List-Unsubscribe", "Unsubscribe"];

/// Client for the signed-in user's mailbox. The access token is supplied per call.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

impl GmailClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(GMAIL_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn message_url(&self, message_id: &str, format: MessageFormat) -> String {
        let mut url = format!(
            "{}/users/me/messages/{}?format={}",
            self.base_url,
            urlencoding::encode(message_id),
            format.as_str()
        );
        if format == MessageFormat::Metadata {
            for header in METADATA_HEADERS {
                url.push_str("&metadataHeaders=");
                url.push_str(&urlencoding::encode(header));
            }
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
    ) -> Result<T, ProviderError> {
        let response = self.http.get(url).bearer_auth(access_token).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let limit = max_results as usize;
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < limit {
            let page_size = (limit - ids.len()).min(MAX_PAGE_SIZE as usize);
            let mut url = format!(
                "{}/users/me/messages?q={}&maxResults={}",
                self.base_url,
                urlencoding::encode(query),
                page_size
            );
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(&urlencoding::encode(token));
            }

            let page: ListResponse = self.get_json(access_token, &url).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        ids.truncate(limit);
        Ok(ids)
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
        format: MessageFormat,
    ) -> Result<RawMessage, ProviderError> {
        let url = self.message_url(message_id, format);
        let message: WireMessage = self.get_json(access_token, &url).await?;
        Ok(message.into())
    }
}
