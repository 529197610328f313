use async_trait::async_trait;

use super::error::ProviderError;
use super::message::{MessageFormat, RawMessage};

/// Read access to a user's mailbox.
///
/// The query language is the provider's search syntax: `from:`, `after:`,
/// `subject:`, `header:` terms, space-separated for AND, `OR` for alternation.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Ids of messages matching `query`, at most `max_results`.
    async fn list_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError>;

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
        format: MessageFormat,
    ) -> Result<RawMessage, ProviderError>;
}
