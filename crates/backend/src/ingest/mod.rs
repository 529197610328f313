//! Newsletter ingestion pipeline.
//!
//! Classifies mailbox messages, extracts their content, and incrementally
//! syncs subscribed senders into storage. Provider access goes through
//! [`MailProvider`], storage through the traits in [`crate::repository`].

pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod extract;
pub mod locks;
pub mod message;
pub mod provider;
pub mod query;
pub mod sync;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DiscoveryConfig, SyncConfig};
pub use directory::SenderDirectory;
pub use error::{IngestError, ProviderError};
pub use provider::MailProvider;
pub use sync::SyncEngine;
pub use tokens::{OAuthClient, TokenGrant, TokenRefresher};
