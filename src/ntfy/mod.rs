// src/ntfy/mod.rs
pub mod record;
pub mod stream;

use async_trait::async_trait;

use crate::error::StreamError;
use crate::mapping::Mapping;

pub use record::{NotificationRecord, Priority, SourceEvent};
pub use stream::{NtfyClient, RecordStream};

/// Opens one subscription stream for a mapping. No retries: reconnecting is
/// the worker's job.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// `since` is the id of the last record already handled, so the server
    /// can replay what was published while disconnected.
    async fn subscribe(
        &self,
        mapping: &Mapping,
        since: Option<&str>,
    ) -> Result<RecordStream, StreamError>;
}
