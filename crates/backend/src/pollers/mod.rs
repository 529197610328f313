//! Mail provider adapter and the background sync task.

pub mod gmail_client;
pub mod sync_task;

pub use gmail_client::GmailClient;
pub use sync_task::{start_sync_task, SyncPollerConfig};
