//! In-memory transport backing tests and local development.

use crate::error::{Result, StoreError};
use crate::types::{Record, RecordFilter, RecordId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use super::transport::{ChangeNotice, RemoteTransport};

/// Buffered change notices before slow subscribers start lagging.
const CHANGE_BUFFER: usize = 64;

/// HashMap-backed [`RemoteTransport`] with injectable failure modes.
///
/// Failure toggles flip at runtime so tests can degrade individual
/// operations mid-scenario.
pub struct InMemoryTransport {
    records: RwLock<HashMap<RecordId, Record>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    changes: broadcast::Sender<ChangeNotice>,
    handshake_delay: Option<Duration>,
    fail_handshake: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_uploads: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            records: RwLock::new(HashMap::new()),
            blobs: RwLock::new(HashMap::new()),
            changes,
            handshake_delay: None,
            fail_handshake: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// Delay the handshake, simulating a slow or unreachable backend.
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = Some(delay);
        self
    }

    /// Make the handshake fail outright.
    pub fn with_failing_handshake(self) -> Self {
        self.fail_handshake.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.read().contains_key(id)
    }

    /// Number of uploaded blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    fn notify(&self) {
        let _ = self.changes.send(ChangeNotice);
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTransport for InMemoryTransport {
    async fn handshake(&self) -> Result<()> {
        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_handshake.load(Ordering::SeqCst) {
            return Err(StoreError::RemoteUnavailable("handshake refused".into()));
        }
        Ok(())
    }

    async fn put(&self, id: &RecordId, record: &Record) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("write unavailable".into()));
        }
        self.records.write().insert(id.clone(), record.clone());
        self.notify();
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("read unavailable".into()));
        }
        Ok(self.records.read().get(id).cloned())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("read unavailable".into()));
        }
        let mut matched: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // Descending creation time; records without a timestamp sort last.
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("write unavailable".into()));
        }
        self.records.write().remove(id);
        self.notify();
        Ok(())
    }

    async fn upload_blob(&self, path: &str, _media_type: &str, bytes: Vec<u8>) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::BlobUpload("upload rejected".into()));
        }
        self.blobs.write().insert(path.to_string(), bytes);
        Ok(format!("memory://blobs/{path}"))
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }
}
