//! Capability contract for remote record backends.
//!
//! The adapter and remote store depend only on this trait, never on a
//! concrete backend, so an alternative backend can be substituted without
//! touching either.

use crate::error::Result;
use crate::types::{Record, RecordFilter, RecordId};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Notification that the remote result set changed. Carries no payload:
/// subscribers re-query the full set on every notice.
#[derive(Clone, Debug)]
pub struct ChangeNotice;

/// Operations a networked record backend must provide.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Initialization handshake. Must complete successfully before any
    /// other operation is serviced.
    async fn handshake(&self) -> Result<()>;

    /// Upsert a record under its id.
    async fn put(&self, id: &RecordId, record: &Record) -> Result<()>;

    /// Fetch a record by id.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Structured query, ordered by descending creation time.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// Delete a record by id.
    async fn delete(&self, id: &RecordId) -> Result<()>;

    /// Upload binary content to the backend's blob facility, returning the
    /// public locator of the stored bytes.
    async fn upload_blob(&self, path: &str, media_type: &str, bytes: Vec<u8>) -> Result<String>;

    /// Subscribe to change notifications.
    fn changes(&self) -> broadcast::Receiver<ChangeNotice>;
}
