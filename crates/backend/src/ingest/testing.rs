//! In-memory fakes for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use shared_types::{IngestedNewsletter, NewsletterSender, Subscription};
use uuid::Uuid;

use super::error::ProviderError;
use super::message::{BodyPart, Header, MessageFormat, MessagePayload, RawMessage};
use super::provider::MailProvider;
use super::tokens::{OAuthClient, TokenGrant};
use crate::models::{Credential, DedupKey, NewIngestedNewsletter};
use crate::repository::{CredentialStore, NewsletterStore, SenderStore, SubscriptionStore};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
}

pub fn encode(text: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
}

/// A newsletter-shaped message with a `List-Unsubscribe` header and a plain body.
pub fn newsletter_message(id: &str, from: &str, subject: &str, date: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        headers: vec![
            Header::new("From", from),
            Header::new("Subject", subject),
            Header::new("Date", date),
            Header::new("List-Unsubscribe", "<mailto:leave@example.com>"),
        ],
        internal_date: None,
        payload: MessagePayload::SinglePart(BodyPart {
            mime_type: "text/plain".to_string(),
            data: Some(encode(&format!("Body of {}", subject))),
        }),
    }
}

pub fn personal_message(id: &str, from: &str, subject: &str, date: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        headers: vec![
            Header::new("From", from),
            Header::new("Subject", subject),
            Header::new("Date", date),
        ],
        internal_date: None,
        payload: MessagePayload::SinglePart(BodyPart {
            mime_type: "text/plain".to_string(),
            data: Some(encode("hi")),
        }),
    }
}

#[derive(Default)]
struct Tables {
    credentials: HashMap<(Uuid, String), Credential>,
    subscriptions: Vec<Subscription>,
    senders: Vec<NewsletterSender>,
    newsletters: Vec<IngestedNewsletter>,
}

/// Every store trait over plain vectors.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    credential_writes: AtomicUsize,
    fail_inserts_for: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn credential_writes(&self) -> usize {
        self.credential_writes.load(Ordering::SeqCst)
    }

    /// Make `insert` fail for newsletters with this subject.
    pub fn fail_inserts_for(&self, subject: &str) {
        self.fail_inserts_for
            .lock()
            .unwrap()
            .insert(subject.to_string());
    }

    pub fn clear_insert_failures(&self) {
        self.fail_inserts_for.lock().unwrap().clear();
    }

    pub fn newsletters(&self) -> Vec<IngestedNewsletter> {
        self.tables.lock().unwrap().newsletters.clone()
    }

    pub fn senders(&self) -> Vec<NewsletterSender> {
        self.tables.lock().unwrap().senders.clone()
    }

    pub fn seed_newsletter(
        &self,
        user_id: Uuid,
        sender_email: &str,
        subject: &str,
        date: &str,
        sent_at: DateTime<Utc>,
    ) {
        self.tables.lock().unwrap().newsletters.push(IngestedNewsletter {
            id: Uuid::new_v4(),
            user_id,
            sender_email: sender_email.to_string(),
            subject: subject.to_string(),
            from_display: sender_email.to_string(),
            date: date.to_string(),
            sent_at: Some(sent_at),
            plain_text: None,
            html_content: None,
            received_at: sent_at,
            is_read: false,
        });
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, user_id: Uuid, provider: &str) -> Result<Option<Credential>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .credentials
            .get(&(user_id, provider.to_string()))
            .cloned())
    }

    async fn upsert(&self, credential: &Credential, _now: DateTime<Utc>) -> Result<Credential> {
        self.credential_writes.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock().unwrap();
        tables.credentials.insert(
            (credential.user_id, credential.provider.clone()),
            credential.clone(),
        );
        Ok(credential.clone())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        let tables = self.tables.lock().unwrap();
        let mut items: Vec<_> = tables
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.sender_email.cmp(&b.sender_email));
        Ok(items)
    }

    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        let items = SubscriptionStore::list_for_user(self, user_id).await?;
        Ok(items.into_iter().filter(|s| s.subscribed).collect())
    }

    async fn set(
        &self,
        user_id: Uuid,
        sender_email: &str,
        subscribed: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.user_id == user_id && s.sender_email == sender_email)
        {
            if subscribed && !existing.subscribed {
                existing.subscribed_at = now;
            }
            existing.subscribed = subscribed;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            sender_email: sender_email.to_string(),
            subscribed,
            subscribed_at: now,
            updated_at: now,
        };
        tables.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn users_with_active(&self) -> Result<Vec<Uuid>> {
        let tables = self.tables.lock().unwrap();
        let mut users: Vec<Uuid> = tables
            .subscriptions
            .iter()
            .filter(|s| s.subscribed)
            .map(|s| s.user_id)
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}

#[async_trait]
impl SenderStore for MemoryStore {
    async fn upsert_discovered(
        &self,
        name: &str,
        email: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<NewsletterSender> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.senders.iter_mut().find(|s| s.email == email) {
            existing.name = name.to_string();
            existing.email_count += 1;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let sender = NewsletterSender {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            domain: domain.to_string(),
            email_count: 1,
            created_at: now,
            updated_at: now,
        };
        tables.senders.push(sender.clone());
        Ok(sender)
    }
}

#[async_trait]
impl NewsletterStore for MemoryStore {
    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<IngestedNewsletter>> {
        let tables = self.tables.lock().unwrap();
        let mut items: Vec<_> = tables
            .newsletters
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        // Newest first, undated last
        items.sort_by(|a, b| match (a.sent_at, b.sent_at) {
            (Some(x), Some(y)) => y.cmp(&x).then(b.received_at.cmp(&a.received_at)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.received_at.cmp(&a.received_at),
        });

        let offset = offset.unwrap_or(0).max(0) as usize;
        let limit = limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_for_user(&self, user_id: Uuid) -> Result<usize> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .newsletters
            .iter()
            .filter(|n| n.user_id == user_id)
            .count())
    }

    async fn watermark(&self, user_id: Uuid, sender_email: &str) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .newsletters
            .iter()
            .filter(|n| n.user_id == user_id && n.sender_email == sender_email)
            .filter_map(|n| n.sent_at)
            .max())
    }

    async fn existing_keys(
        &self,
        user_id: Uuid,
        sender_email: &str,
        dates: &[String],
    ) -> Result<HashSet<DedupKey>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .newsletters
            .iter()
            .filter(|n| n.user_id == user_id && n.sender_email == sender_email)
            .filter(|n| dates.contains(&n.date))
            .map(|n| DedupKey {
                subject: n.subject.clone(),
                date: n.date.clone(),
            })
            .collect())
    }

    async fn insert(&self, newsletter: &NewIngestedNewsletter) -> Result<IngestedNewsletter> {
        if self
            .fail_inserts_for
            .lock()
            .unwrap()
            .contains(&newsletter.subject)
        {
            return Err(anyhow!("insert rejected for {}", newsletter.subject));
        }

        let row = IngestedNewsletter {
            id: Uuid::new_v4(),
            user_id: newsletter.user_id,
            sender_email: newsletter.sender_email.clone(),
            subject: newsletter.subject.clone(),
            from_display: newsletter.from_display.clone(),
            date: newsletter.date.clone(),
            sent_at: newsletter.sent_at,
            plain_text: newsletter.plain_text.clone(),
            html_content: newsletter.html_content.clone(),
            received_at: newsletter.received_at,
            is_read: false,
        };
        self.tables.lock().unwrap().newsletters.push(row.clone());
        Ok(row)
    }

    async fn mark_read(
        &self,
        user_id: Uuid,
        newsletter_id: Uuid,
    ) -> Result<Option<IngestedNewsletter>> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .newsletters
            .iter_mut()
            .find(|n| n.id == newsletter_id && n.user_id == user_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }
}

/// Mailbox returning every stored message for any query.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<Vec<RawMessage>>,
    failing: Mutex<HashSet<String>>,
    list_error: Mutex<Option<ProviderError>>,
    queries: Mutex<Vec<(String, u32)>>,
    fetches: Mutex<Vec<(String, MessageFormat)>>,
}

impl FakeMailbox {
    pub fn with_messages(messages: Vec<RawMessage>) -> Self {
        let mailbox = Self::default();
        *mailbox.messages.lock().unwrap() = messages;
        mailbox
    }

    pub fn push(&self, message: RawMessage) {
        self.messages.lock().unwrap().push(message);
    }

    /// `get_message` fails for this id.
    pub fn fail_fetch(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// The next `list_messages` call fails with `error`.
    pub fn fail_next_list(&self, error: ProviderError) {
        *self.list_error.lock().unwrap() = Some(error);
    }

    pub fn queries(&self) -> Vec<(String, u32)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<(String, MessageFormat)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap().len() + self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn list_messages(
        &self,
        _access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError> {
        self.queries
            .lock()
            .unwrap()
            .push((query.to_string(), max_results));
        tokio::task::yield_now().await;

        if let Some(error) = self.list_error.lock().unwrap().take() {
            return Err(error);
        }

        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .take(max_results as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get_message(
        &self,
        _access_token: &str,
        message_id: &str,
        format: MessageFormat,
    ) -> Result<RawMessage, ProviderError> {
        self.fetches
            .lock()
            .unwrap()
            .push((message_id.to_string(), format));

        if self.failing.lock().unwrap().contains(message_id) {
            return Err(ProviderError::Status {
                status: 500,
                body: "backend error".to_string(),
            });
        }

        let message = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                status: 404,
                body: "not found".to_string(),
            })?;

        Ok(match format {
            MessageFormat::Full => message,
            MessageFormat::Metadata => RawMessage {
                payload: MessagePayload::Empty,
                ..message
            },
        })
    }
}

pub struct FakeOAuth {
    response: std::result::Result<TokenGrant, String>,
    calls: Mutex<Vec<String>>,
}

impl FakeOAuth {
    pub fn granting(grant: TokenGrant) -> Self {
        Self {
            response: Ok(grant),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Refresh tokens presented so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OAuthClient for FakeOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.calls.lock().unwrap().push(refresh_token.to_string());
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;
        self.response.clone().map_err(|e| anyhow!(e))
    }
}
