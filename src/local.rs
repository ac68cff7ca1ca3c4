//! Local record store: the durable, last-resort tier.
//!
//! The whole collection lives under one stable storage location (a single
//! JSON document on device storage), loaded at open and rewritten on every
//! mutation. Lookups are linear scans; the tier is bounded by on-device
//! storage limits, not request volume, so no indexing is kept.
//!
//! Missing keys are never an error here: reads return `None`/empty and
//! `delete` reports `false` instead of failing.

use crate::error::Result;
use crate::types::{Record, RecordId, RecordStatus};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the serialized collection inside the store directory.
const COLLECTION_FILE: &str = "records.json";

/// Soft budget for the serialized collection, matching the on-device
/// storage quota the original deployment target enforced.
const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Size report for the local collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageInfo {
    pub record_count: usize,
    pub size_bytes: u64,
    pub quota_bytes: u64,
    pub remaining_bytes: u64,
}

/// Durable key-value store of records on the client device.
///
/// Logically synchronous; the async methods exist for interface symmetry
/// with the remote tier.
pub struct RecordStore {
    path: PathBuf,
    quota_bytes: u64,
    records: Mutex<Vec<Record>>,
}

impl RecordStore {
    /// Open the store at `dir`, initializing an empty collection if none
    /// exists yet.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_quota(dir, DEFAULT_QUOTA_BYTES)
    }

    /// Open with a custom soft quota.
    pub fn open_with_quota(dir: impl AsRef<Path>, quota_bytes: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let path = dir.join(COLLECTION_FILE);
        let records = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)
                .map_err(|e| crate::error::StoreError::Deserialization(e.to_string()))?
        } else {
            fs::write(&path, "[]")?;
            Vec::new()
        };

        Ok(Self {
            path,
            quota_bytes,
            records: Mutex::new(records),
        })
    }

    /// Save a record, assigning an id and registration date when absent.
    /// An existing record with the same id is replaced (ids stay unique
    /// within this store). Returns the id.
    pub async fn save(&self, mut record: Record) -> Result<RecordId> {
        let id = record.ensure_id();
        if record.registration_date.is_none() {
            record.registration_date = Some(Utc::now());
        }

        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id.as_ref() == Some(&id)) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.persist(&records)?;

        tracing::debug!(id = %id, "record saved locally");
        Ok(id)
    }

    /// Get a record by id.
    pub async fn get(&self, id: &RecordId) -> Option<Record> {
        self.records
            .lock()
            .iter()
            .find(|r| r.id.as_ref() == Some(id))
            .cloned()
    }

    /// All records, in insertion order.
    pub async fn get_all(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Shallow-merge a patch into the record with the given id. Returns the
    /// updated record, or `None` when no such record exists.
    pub async fn update(
        &self,
        id: &RecordId,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<Record>> {
        let mut records = self.records.lock();
        let Some(record) = records.iter_mut().find(|r| r.id.as_ref() == Some(id)) else {
            return Ok(None);
        };
        record.apply_patch(patch)?;
        record.updated_at = Some(Utc::now());
        let updated = record.clone();
        self.persist(&records)?;
        Ok(Some(updated))
    }

    /// Delete a record. Returns whether anything was removed.
    pub async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id.as_ref() != Some(id));
        if records.len() == before {
            return Ok(false);
        }
        self.persist(&records)?;
        Ok(true)
    }

    /// Records with the given status.
    pub async fn by_status(&self, status: &RecordStatus) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .filter(|r| &r.status == status)
            .cloned()
            .collect()
    }

    /// Active records.
    pub async fn get_active(&self) -> Vec<Record> {
        self.by_status(&RecordStatus::Active).await
    }

    /// Pending records.
    pub async fn get_pending(&self) -> Vec<Record> {
        self.by_status(&RecordStatus::Pending).await
    }

    /// Case-insensitive substring search over name, intro, and description.
    pub async fn search(&self, query: &str) -> Vec<Record> {
        let needle = query.to_lowercase();
        self.records
            .lock()
            .iter()
            .filter(|r| {
                let info = r.personal_info.as_ref();
                let field = |s: Option<&str>| {
                    s.map(|v| v.to_lowercase().contains(&needle)).unwrap_or(false)
                };
                field(info.and_then(|i| i.name.as_deref()))
                    || field(info.and_then(|i| i.intro.as_deref()))
                    || field(info.and_then(|i| i.description.as_deref()))
            })
            .cloned()
            .collect()
    }

    /// Records carrying any of the given categories. An empty category list
    /// matches everything.
    pub async fn filter_by_categories(&self, categories: &[String]) -> Vec<Record> {
        let records = self.records.lock();
        if categories.is_empty() {
            return records.clone();
        }
        records
            .iter()
            .filter(|r| {
                r.personal_info
                    .as_ref()
                    .and_then(|i| i.categories.as_ref())
                    .map(|cats| categories.iter().any(|c| cats.contains(c)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Estimate of the serialized collection size against the soft quota.
    pub async fn storage_info(&self) -> Result<StorageInfo> {
        let records = self.records.lock();
        let size_bytes = serde_json::to_vec(&*records)?.len() as u64;
        Ok(StorageInfo {
            record_count: records.len(),
            size_bytes,
            quota_bytes: self.quota_bytes,
            remaining_bytes: self.quota_bytes.saturating_sub(size_bytes),
        })
    }

    /// Dump the whole collection as pretty-printed JSON.
    pub async fn export_json(&self) -> Result<String> {
        let records = self.records.lock();
        Ok(serde_json::to_string_pretty(&*records)?)
    }

    /// Merge-import a collection dump. Imported records are appended
    /// without deduplication; returns how many were imported.
    pub async fn import_json(&self, data: &str) -> Result<usize> {
        let imported: Vec<Record> = serde_json::from_str(data)
            .map_err(|e| crate::error::StoreError::Deserialization(e.to_string()))?;
        let count = imported.len();

        let mut records = self.records.lock();
        records.extend(imported);
        self.persist(&records)?;

        Ok(count)
    }

    fn persist(&self, records: &[Record]) -> Result<()> {
        let data = serde_json::to_vec(records)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}
