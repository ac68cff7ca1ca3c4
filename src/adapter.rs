//! Storage adapter: the single API surface consumed by the rest of the
//! application.
//!
//! The adapter probes the remote store once at construction. If the
//! readiness handshake resolves within the bounded wait the session runs
//! in hybrid mode; otherwise it runs local-only for the rest of the
//! session; there is no retry loop back to hybrid.
//!
//! Writes are best-effort and non-atomic across the two stores: an update
//! or delete that succeeds in one store and fails in the other leaves them
//! diverged. That is a deliberate availability-over-consistency trade-off
//! carried from the source system, documented here rather than hidden.

use crate::error::{Result, StoreError};
use crate::local::RecordStore;
use crate::remote::RemoteStore;
use crate::types::{Record, RecordFilter, RecordId, TierChange};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Session mode, decided once by the readiness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterMode {
    /// Remote-first with local fallback.
    Hybrid,
    /// Every operation routes to the local store.
    LocalOnly,
}

/// Adapter configuration.
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    /// Bounded wait for the remote readiness handshake.
    pub probe_wait: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            probe_wait: Duration::from_secs(10),
        }
    }
}

/// Outcome of one background push of a locally-held record to the remote
/// store. Delivered on the backfill channel handed out at construction;
/// the triggering read never awaits it.
#[derive(Debug)]
pub struct BackfillOutcome {
    pub id: RecordId,
    pub result: Result<()>,
}

/// Orchestrates the local and remote stores behind one API, with
/// automatic fallback and deduplicated merge reads.
pub struct StorageAdapter {
    local: Arc<RecordStore>,
    remote: Arc<RemoteStore>,
    mode: AdapterMode,
    backfill_tx: mpsc::UnboundedSender<BackfillOutcome>,
}

impl StorageAdapter {
    /// Probe the remote store and construct the adapter in the resulting
    /// mode. Also returns the receiving end of the backfill channel;
    /// callers may drain it, await it, or drop it.
    ///
    /// The only fatal failure in this layer is the complete absence of a
    /// backing store, which surfaces earlier, from [`RecordStore::open`];
    /// a failed or slow probe merely degrades the session to local-only.
    pub async fn connect(
        local: RecordStore,
        remote: RemoteStore,
        config: AdapterConfig,
    ) -> (Self, mpsc::UnboundedReceiver<BackfillOutcome>) {
        let mode = match tokio::time::timeout(config.probe_wait, remote.wait_ready()).await {
            Ok(Ok(())) => {
                info!("remote store ready; running in hybrid mode");
                AdapterMode::Hybrid
            }
            Ok(Err(e)) => {
                warn!(error = %e, "remote store unavailable; running local-only");
                AdapterMode::LocalOnly
            }
            Err(_) => {
                warn!(
                    wait = ?config.probe_wait,
                    "remote readiness probe timed out; running local-only"
                );
                AdapterMode::LocalOnly
            }
        };

        let (backfill_tx, backfill_rx) = mpsc::unbounded_channel();
        (
            Self {
                local: Arc::new(local),
                remote: Arc::new(remote),
                mode,
                backfill_tx,
            },
            backfill_rx,
        )
    }

    pub fn mode(&self) -> AdapterMode {
        self.mode
    }

    /// The local tier, for collaborators that need it directly.
    pub fn local(&self) -> &RecordStore {
        &self.local
    }

    /// The remote tier.
    pub fn remote(&self) -> &RemoteStore {
        &self.remote
    }

    // --- Writes ---

    /// Save a record. Hybrid mode writes the remote store and degrades to
    /// local-only persistence on any remote failure (logged, not
    /// surfaced); the record then lives locally until a later merge read
    /// backfills it. Returns the (possibly newly generated) id.
    pub async fn save(&self, record: Record) -> Result<RecordId> {
        if self.mode == AdapterMode::Hybrid {
            match self.remote.save(record.clone()).await {
                Ok(id) => return Ok(id),
                Err(e) => {
                    warn!(error = %e, "remote save failed; degrading to local persistence");
                }
            }
        }
        self.local.save(record).await
    }

    /// Shallow-merge a patch into the record in both stores,
    /// independently. No two-store transaction exists: one store may
    /// apply the patch while the other fails. Errors only when neither
    /// store applied it.
    pub async fn update(
        &self,
        id: &RecordId,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let mut remote_ok = false;
        if self.mode == AdapterMode::Hybrid {
            match self.remote.update(id, patch).await {
                Ok(_) => remote_ok = true,
                Err(e) => warn!(id = %id, error = %e, "remote update failed"),
            }
        }

        let local_result = self.local.update(id, patch).await;
        match (remote_ok, local_result) {
            (_, Ok(Some(_))) => Ok(()),
            (true, Ok(None)) => Ok(()),
            (true, Err(e)) => {
                warn!(id = %id, error = %e, "local update mirror failed");
                Ok(())
            }
            (false, Ok(None)) => Err(StoreError::RecordNotFound(id.clone())),
            (false, Err(e)) => Err(e),
        }
    }

    /// Delete a record from both stores, best-effort. Failures are logged
    /// and masked, matching the two-store update semantics.
    pub async fn delete(&self, id: &RecordId) {
        if self.mode == AdapterMode::Hybrid {
            if let Err(e) = self.remote.delete(id).await {
                warn!(id = %id, error = %e, "remote delete failed");
            }
        }
        if let Err(e) = self.local.delete(id).await {
            warn!(id = %id, error = %e, "local delete failed");
        }
    }

    /// Premium-tier change: computes badge, start/end dates, and sort
    /// priority, then routes through [`StorageAdapter::update`].
    pub async fn update_tier(&self, id: &RecordId, change: &TierChange) -> Result<()> {
        let now = Utc::now();
        let badge = change
            .badge_text
            .clone()
            .unwrap_or_else(|| default_badge(&change.tier).to_string());
        let end = if change.duration_months > 0 {
            Some(now + chrono::Duration::days(change.duration_months * 30))
        } else {
            None
        };

        let mut patch = serde_json::Map::new();
        patch.insert("tier".into(), json!(change.tier));
        patch.insert("premiumBadge".into(), json!(badge));
        patch.insert("premiumStartDate".into(), json!(now));
        patch.insert("premiumEndDate".into(), json!(end));
        patch.insert(
            "sortPriority".into(),
            json!(change.sort_priority.unwrap_or(1000)),
        );

        self.update(id, &patch).await
    }

    // --- Reads ---

    /// Get a record by id. Hybrid mode tries the remote store first and
    /// falls back to the local store on "not found" or any error; this
    /// covers records that exist only locally, not yet backfilled.
    pub async fn get(&self, id: &RecordId) -> Option<Record> {
        if self.mode == AdapterMode::Hybrid {
            match self.remote.get(id).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(e) => warn!(id = %id, error = %e, "remote get failed; falling back to local"),
            }
        }
        self.local.get(id).await
    }

    /// All records from both stores, dedup-merged with remote precedence.
    pub async fn get_all(&self) -> Vec<Record> {
        self.merged_read(&RecordFilter::all()).await
    }

    /// Active records from both stores, dedup-merged.
    pub async fn get_active(&self) -> Vec<Record> {
        self.merged_read(&RecordFilter::active()).await
    }

    /// Pending records from both stores, dedup-merged.
    pub async fn get_pending(&self) -> Vec<Record> {
        self.merged_read(&RecordFilter::pending()).await
    }

    /// Case-insensitive substring search. Delegates to the remote store's
    /// query in hybrid mode, falling back to the local scan.
    pub async fn search(&self, query: &str) -> Vec<Record> {
        if self.mode == AdapterMode::Hybrid {
            match self.remote.search(query).await {
                Ok(hits) => return hits,
                Err(e) => warn!(error = %e, "remote search failed; falling back to local"),
            }
        }
        self.local.search(query).await
    }

    /// Fetch from both stores and merge into an id-keyed set: remote
    /// entries first (remote wins on id collision), then local entries for
    /// ids the remote set lacks. Ids found only locally are handed to the
    /// backfill queue. The merge set is rebuilt from scratch on every call.
    async fn merged_read(&self, filter: &RecordFilter) -> Vec<Record> {
        let local_set = match &filter.status {
            Some(status) => self.local.by_status(status).await,
            None => self.local.get_all().await,
        };

        if self.mode == AdapterMode::LocalOnly {
            return local_set;
        }

        let remote_set = match self.remote.query(filter).await {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "remote query failed; merging local set only");
                Vec::new()
            }
        };

        let mut seen: HashSet<RecordId> = HashSet::new();
        let mut merged = Vec::with_capacity(remote_set.len() + local_set.len());
        for record in remote_set {
            if let Some(id) = &record.id {
                seen.insert(id.clone());
            }
            merged.push(record);
        }

        for record in local_set {
            match &record.id {
                Some(id) if seen.contains(id) => {}
                Some(id) => {
                    seen.insert(id.clone());
                    self.spawn_backfill(record.clone());
                    merged.push(record);
                }
                // A record with no id cannot collide; include it as-is.
                None => merged.push(record),
            }
        }

        merged
    }

    /// Detached push of a locally-held record into the remote store. The
    /// caller's read does not await it; the outcome lands on the backfill
    /// channel.
    fn spawn_backfill(&self, record: Record) {
        let Some(id) = record.id.clone() else { return };
        let remote = Arc::clone(&self.remote);
        let tx = self.backfill_tx.clone();
        tokio::spawn(async move {
            let result = remote.save(record).await.map(|_| ());
            if let Err(e) = &result {
                warn!(id = %id, error = %e, "backfill push failed");
            }
            let _ = tx.send(BackfillOutcome { id, result });
        });
    }
}

fn default_badge(tier: &str) -> &'static str {
    match tier {
        "premium" => "⭐ Premium",
        "vip" => "💎 VIP",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryTransport;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, status: &str) -> Record {
        serde_json::from_value(json!({
            "id": id,
            "status": status,
            "personalInfo": { "name": format!("name-{id}") }
        }))
        .unwrap()
    }

    async fn hybrid_adapter(
        dir: &TempDir,
        transport: Arc<InMemoryTransport>,
    ) -> (StorageAdapter, mpsc::UnboundedReceiver<BackfillOutcome>) {
        let local = RecordStore::open(dir.path()).unwrap();
        let remote = RemoteStore::connect(transport);
        StorageAdapter::connect(local, remote, AdapterConfig::default()).await
    }

    #[tokio::test]
    async fn test_probe_success_enters_hybrid() {
        let dir = TempDir::new().unwrap();
        let (adapter, _rx) = hybrid_adapter(&dir, Arc::new(InMemoryTransport::new())).await;
        assert_eq!(adapter.mode(), AdapterMode::Hybrid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_enters_local_only() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            InMemoryTransport::new().with_handshake_delay(Duration::from_secs(3600)),
        );
        let (adapter, _rx) = hybrid_adapter(&dir, transport).await;
        assert_eq!(adapter.mode(), AdapterMode::LocalOnly);
    }

    #[tokio::test]
    async fn test_save_degrades_to_local_on_remote_failure() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(InMemoryTransport::new());
        let (adapter, _rx) = hybrid_adapter(&dir, Arc::clone(&transport)).await;

        transport.set_fail_writes(true);
        let id = adapter.save(record("m1", "pending")).await.unwrap();

        // Lives only in the local store until a merge read backfills it.
        assert!(!transport.contains(&id));
        assert!(adapter.local().get(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_update_tier_builds_patch() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(InMemoryTransport::new());
        let (adapter, _rx) = hybrid_adapter(&dir, transport).await;

        let id = adapter.save(record("m1", "active")).await.unwrap();
        adapter
            .update_tier(
                &id,
                &TierChange {
                    tier: "vip".into(),
                    badge_text: None,
                    duration_months: 2,
                    sort_priority: Some(5),
                },
            )
            .await
            .unwrap();

        let updated = adapter.get(&id).await.unwrap();
        assert_eq!(updated.tier.as_deref(), Some("vip"));
        assert_eq!(updated.premium_badge.as_deref(), Some("💎 VIP"));
        assert!(updated.premium_end_date.is_some());
        assert_eq!(updated.sort_priority, Some(5));
    }
}
