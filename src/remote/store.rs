//! Networked, authoritative record store.
//!
//! Construction begins the transport's initialization handshake; every
//! operation issued before readiness is queued behind it rather than
//! failing early. Saves offload inline media payloads to blob storage,
//! keeping the inline bytes (degraded but valid) when an upload fails.

use crate::error::{Result, StoreError};
use crate::types::{
    InlinePayload, MediaSource, Record, RecordFilter, RecordId, RecordStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::RemoteTransport;

/// Outcome of the initialization handshake.
#[derive(Clone, Debug)]
enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

/// Callback receiving the full current result set on every change.
pub type SubscriptionCallback = Box<dyn Fn(Vec<Record>) + Send + Sync>;

/// Handle for tearing down a live subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop redelivering result sets.
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The remote store facade over a [`RemoteTransport`].
pub struct RemoteStore {
    transport: Arc<dyn RemoteTransport>,
    ready: watch::Receiver<ReadyState>,
    _init: JoinHandle<()>,
}

impl RemoteStore {
    /// Wrap a transport and begin its initialization handshake. Must be
    /// called from within a runtime; operations issued before the
    /// handshake completes suspend until it does.
    pub fn connect(transport: Arc<dyn RemoteTransport>) -> Self {
        let (tx, rx) = watch::channel(ReadyState::Pending);
        let handshake_transport = Arc::clone(&transport);
        let init = tokio::spawn(async move {
            let state = match handshake_transport.handshake().await {
                Ok(()) => {
                    debug!("remote store ready");
                    ReadyState::Ready
                }
                Err(e) => {
                    warn!(error = %e, "remote store handshake failed");
                    ReadyState::Failed(e.to_string())
                }
            };
            let _ = tx.send(state);
        });

        Self {
            transport,
            ready: rx,
            _init: init,
        }
    }

    /// Suspend until the handshake resolves; error if it failed.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.ready.clone();
        loop {
            let state = rx.borrow().clone();
            match state {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(e) => return Err(StoreError::RemoteUnavailable(e)),
                ReadyState::Pending => {
                    if rx.changed().await.is_err() {
                        return Err(StoreError::RemoteUnavailable(
                            "initialization task dropped".into(),
                        ));
                    }
                }
            }
        }
    }

    /// Save a record, offloading inline media payloads to blob storage
    /// first. Returns the (possibly newly generated) id.
    pub async fn save(&self, mut record: Record) -> Result<RecordId> {
        self.wait_ready().await?;

        let id = record.ensure_id();
        let now = Utc::now();
        if record.created_at.is_none() {
            record.created_at = Some(now);
        }
        record.updated_at = Some(now);

        self.offload_inline_media(&mut record, &id).await;

        self.transport.put(&id, &record).await?;
        debug!(id = %id, "record saved remotely");
        Ok(id)
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        self.wait_ready().await?;
        self.transport.get(id).await
    }

    /// Run a structured query.
    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        self.wait_ready().await?;
        self.transport.query(filter).await
    }

    pub async fn get_all(&self) -> Result<Vec<Record>> {
        self.query(&RecordFilter::all()).await
    }

    pub async fn get_active(&self) -> Result<Vec<Record>> {
        self.query(&RecordFilter::active()).await
    }

    pub async fn get_pending(&self) -> Result<Vec<Record>> {
        self.query(&RecordFilter::pending()).await
    }

    /// Active records carrying the given category.
    pub async fn get_by_category(&self, category: &str) -> Result<Vec<Record>> {
        self.query(&RecordFilter::active_in_category(category)).await
    }

    /// Shallow-merge a patch into the stored record.
    pub async fn update(
        &self,
        id: &RecordId,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record> {
        self.wait_ready().await?;

        let Some(mut record) = self.transport.get(id).await? else {
            return Err(StoreError::RecordNotFound(id.clone()));
        };
        record.apply_patch(patch)?;
        record.updated_at = Some(Utc::now());
        self.transport.put(id, &record).await?;
        Ok(record)
    }

    /// Delete a record by id.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        self.wait_ready().await?;
        self.transport.delete(id).await
    }

    /// Case-insensitive substring search over name, intro, and categories
    /// of the active set. Linear scan; the backend has no text index.
    pub async fn search(&self, query: &str) -> Result<Vec<Record>> {
        let needle = query.to_lowercase();
        let active = self.get_active().await?;
        Ok(active
            .into_iter()
            .filter(|r| {
                let info = r.personal_info.as_ref();
                let name = info.and_then(|i| i.name.as_deref()).unwrap_or("");
                let intro = info.and_then(|i| i.intro.as_deref()).unwrap_or("");
                let in_categories = info
                    .and_then(|i| i.categories.as_ref())
                    .map(|cats| cats.iter().any(|c| c.to_lowercase().contains(&needle)))
                    .unwrap_or(false);
                name.to_lowercase().contains(&needle)
                    || intro.to_lowercase().contains(&needle)
                    || in_categories
            })
            .collect())
    }

    /// Subscribe to the live result set for the given status filter.
    ///
    /// The full current result set is delivered once on subscribe and again
    /// on every change notification; this is a full-refresh push model, not
    /// a diff stream.
    pub fn subscribe(
        &self,
        status: Option<RecordStatus>,
        callback: SubscriptionCallback,
    ) -> SubscriptionHandle {
        let transport = Arc::clone(&self.transport);
        let ready = self.ready.clone();
        let filter = match status {
            Some(s) => RecordFilter::by_status(s),
            None => RecordFilter::all(),
        };

        let task = tokio::spawn(async move {
            if wait_for_ready(ready).await.is_err() {
                return;
            }
            let mut changes = transport.changes();

            deliver(&*transport, &filter, &callback).await;
            loop {
                match changes.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        deliver(&*transport, &filter, &callback).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SubscriptionHandle { task }
    }

    /// Replace inline media payloads with blob-storage references.
    /// Per-asset failures keep the inline payload so the save still
    /// succeeds in a degraded, larger-record mode.
    async fn offload_inline_media(&self, record: &mut Record, id: &RecordId) {
        let Some(portfolio) = record.portfolio.as_mut() else {
            return;
        };

        if let Some(MediaSource::Inline(payload)) = portfolio.thumbnail_url.clone() {
            let path = format!("models/thumbnails/{id}.jpg");
            match self.offload_one(&payload, &path).await {
                Ok(url) => portfolio.thumbnail_url = Some(MediaSource::Reference(url)),
                Err(e) => warn!(id = %id, error = %e, "thumbnail offload failed; keeping inline payload"),
            }
        }

        if let Some(images) = portfolio.images.as_mut() {
            for (i, image) in images.iter_mut().enumerate() {
                if let Some(MediaSource::Inline(payload)) = image.url.clone() {
                    let path = format!("models/portfolio/{id}_{i}.jpg");
                    match self.offload_one(&payload, &path).await {
                        Ok(url) => image.url = Some(MediaSource::Reference(url)),
                        Err(e) => warn!(id = %id, index = i, error = %e, "portfolio offload failed; keeping inline payload"),
                    }
                }
            }
        }

        if let Some(gallery) = portfolio.gallery.as_mut() {
            for (i, item) in gallery.iter_mut().enumerate() {
                if let Some(MediaSource::Inline(payload)) = item.url.clone() {
                    let path = format!("models/gallery/{id}_{i}.jpg");
                    match self.offload_one(&payload, &path).await {
                        Ok(url) => item.url = Some(MediaSource::Reference(url)),
                        Err(e) => warn!(id = %id, index = i, error = %e, "gallery offload failed; keeping inline payload"),
                    }
                }
            }
        }
    }

    async fn offload_one(&self, payload: &InlinePayload, path: &str) -> Result<String> {
        let bytes = payload.decode()?;
        self.transport
            .upload_blob(path, payload.media_type(), bytes)
            .await
    }
}

async fn wait_for_ready(mut rx: watch::Receiver<ReadyState>) -> Result<()> {
    loop {
        let state = rx.borrow().clone();
        match state {
            ReadyState::Ready => return Ok(()),
            ReadyState::Failed(e) => return Err(StoreError::RemoteUnavailable(e)),
            ReadyState::Pending => {
                if rx.changed().await.is_err() {
                    return Err(StoreError::RemoteUnavailable(
                        "initialization task dropped".into(),
                    ));
                }
            }
        }
    }
}

async fn deliver(
    transport: &dyn RemoteTransport,
    filter: &RecordFilter,
    callback: &SubscriptionCallback,
) {
    match transport.query(filter).await {
        Ok(set) => callback(set),
        Err(e) => warn!(error = %e, "subscription refresh failed"),
    }
}
