//! Two-tier asset cache: an in-process memory tier over a persistent
//! device tier with time-based expiry.
//!
//! Assets are addressed by their source locator (a URL or an inline
//! payload used verbatim as the key). The memory tier holds ephemeral
//! handles and is not authoritative; it may be cleared independently of
//! the persistent tier. Persistent entries expire 24 hours after
//! insertion and are evicted by a sweep at startup and once per hour.
//!
//! Every failure path degrades: a fetch or decode error yields a
//! pass-through handle wrapping the original locator, so the caller
//! always has something renderable.

use crate::error::{Result, StoreError};
use crate::types::MediaSource;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::fetch::{AssetFetcher, FetchedAsset};

/// Magic bytes for cache entry files.
const ENTRY_MAGIC: &[u8; 4] = b"AST\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// Version-stamped namespace directory. Bumping this invalidates the whole
/// persistent tier across releases without touching the record collection.
const CACHE_NAMESPACE: &str = "asset-cache-v1";

/// Prefix shared by all namespace generations, for startup cleanup.
const CACHE_NAMESPACE_PREFIX: &str = "asset-cache-";

/// Cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Directory holding the version-stamped cache namespace.
    pub root: PathBuf,

    /// Persistent-tier time to live.
    pub ttl: Duration,

    /// Memory-tier capacity (number of handles).
    pub memory_capacity: usize,

    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,

    /// Concurrent fetches per preload batch.
    pub preload_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./asset-cache"),
            ttl: Duration::from_secs(24 * 60 * 60),
            memory_capacity: 256,
            sweep_interval: Duration::from_secs(60 * 60),
            preload_batch: 3,
        }
    }
}

/// Opaque renderable reference to a cached asset.
///
/// Bytes are shared; the underlying buffer is released when the last
/// clone drops. A handle without bytes is a degraded pass-through: the
/// locator itself is still usable by the caller, just unoptimized.
#[derive(Clone, Debug)]
pub struct AssetHandle {
    locator: String,
    bytes: Option<Arc<Vec<u8>>>,
    media_type: Option<String>,
}

impl AssetHandle {
    fn cached(locator: String, bytes: Vec<u8>, media_type: String) -> Self {
        Self {
            locator,
            bytes: Some(Arc::new(bytes)),
            media_type: Some(media_type),
        }
    }

    fn passthrough(locator: String) -> Self {
        Self {
            locator,
            bytes: None,
            media_type: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref().map(|b| b.as_slice())
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// False for a degraded pass-through handle.
    pub fn is_cached(&self) -> bool {
        self.bytes.is_some()
    }
}

/// Persistent-tier usage report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub entries: usize,
    pub bytes: u64,
}

/// The two-tier asset cache.
pub struct BlobCache {
    dir: PathBuf,
    ttl: Duration,
    preload_batch: usize,
    fetcher: Arc<dyn AssetFetcher>,
    memory: Mutex<LruCache<String, AssetHandle>>,
    queue: Mutex<VecDeque<MediaSource>>,
    draining: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BlobCache {
    /// Open the cache, discarding persistent-tier generations from older
    /// namespace versions, sweeping expired entries once, and starting the
    /// hourly sweeper. Must be called from within a runtime.
    pub fn open(config: CacheConfig, fetcher: Arc<dyn AssetFetcher>) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.root)?;
        clean_old_namespaces(&config.root);

        let dir = config.root.join(CACHE_NAMESPACE);
        fs::create_dir_all(&dir)?;

        let capacity = NonZeroUsize::new(config.memory_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let cache = Arc::new(Self {
            dir,
            ttl: config.ttl,
            preload_batch: config.preload_batch.max(1),
            fetcher,
            memory: Mutex::new(LruCache::new(capacity)),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        });

        if let Err(e) = cache.sweep_expired() {
            warn!(error = %e, "startup cache sweep failed");
        }

        let weak = Arc::downgrade(&cache);
        let sweep_interval = config.sweep_interval;
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            // The immediate first tick duplicates the startup sweep.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                match cache.sweep_expired() {
                    Ok(evicted) if evicted > 0 => {
                        debug!(evicted, "expired cache entries evicted")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cache sweep failed"),
                }
            }
        });
        *cache.sweeper.lock() = Some(sweeper);

        Ok(cache)
    }

    /// Resolve an asset to a handle: memory tier, then persistent tier
    /// (entries past their TTL count as misses), then fetch or decode.
    /// Never fails: an unresolvable asset yields a pass-through handle.
    pub async fn get(&self, source: &MediaSource) -> AssetHandle {
        let key = source.locator();

        if let Some(handle) = self.memory.lock().get(&key).cloned() {
            return handle;
        }

        match self.read_entry(&key) {
            Ok(Some((bytes, media_type))) => {
                let handle = AssetHandle::cached(key.clone(), bytes, media_type);
                self.memory.lock().put(key, handle.clone());
                return handle;
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "persistent cache read failed; refetching"),
        }

        let resolved: Result<FetchedAsset> = match source {
            MediaSource::Reference(url) => self.fetcher.fetch(url).await,
            MediaSource::Inline(payload) => payload.decode().map(|bytes| FetchedAsset {
                bytes,
                media_type: payload.media_type().to_string(),
            }),
        };

        match resolved {
            Ok(asset) => {
                if let Err(e) =
                    self.write_entry(&key, &asset.media_type, &asset.bytes, now_micros())
                {
                    warn!(error = %e, "persistent cache write failed");
                }
                let handle = AssetHandle::cached(key.clone(), asset.bytes, asset.media_type);
                self.memory.lock().put(key, handle.clone());
                handle
            }
            Err(e) => {
                warn!(locator = %key, error = %e, "asset resolution failed; passing locator through");
                AssetHandle::passthrough(key)
            }
        }
    }

    /// Queue assets for background caching. The input is de-duplicated,
    /// appended to the internal queue, and drained in fixed-size batches
    /// of concurrent fetches to bound network and memory pressure.
    /// Per-item failures are logged inside `get` and never abort the
    /// batch. Returns without awaiting the drain.
    pub fn preload(self: &Arc<Self>, sources: Vec<MediaSource>) {
        let mut seen = HashSet::new();
        let unique: Vec<MediaSource> = sources
            .into_iter()
            .filter(|s| seen.insert(s.locator()))
            .collect();
        if unique.is_empty() {
            return;
        }

        self.queue.lock().extend(unique);
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let batch: Vec<MediaSource> = {
                    let mut queue = cache.queue.lock();
                    let take = queue.len().min(cache.preload_batch);
                    queue.drain(..take).collect()
                };
                if batch.is_empty() {
                    break;
                }
                futures::future::join_all(batch.iter().map(|s| cache.get(s))).await;
            }
            cache.draining.store(false, Ordering::SeqCst);
        });
    }

    /// Release every memory-tier handle, then clear the persistent tier.
    pub fn clear_all(&self) -> Result<()> {
        self.memory.lock().clear();
        fs::remove_dir_all(&self.dir)?;
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Evict persistent entries older than the TTL. Returns the eviction
    /// count.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = now_micros();
        let mut evicted = 0;

        for path in self.entry_paths()? {
            match read_inserted_at(&path) {
                Ok(inserted_at) if self.expired(inserted_at, now) => {
                    fs::remove_file(&path)?;
                    evicted += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    // Unreadable entries are garbage; drop them too.
                    debug!(path = %path.display(), error = %e, "removing unreadable cache entry");
                    fs::remove_file(&path)?;
                    evicted += 1;
                }
            }
        }

        Ok(evicted)
    }

    /// Persistent-tier entry count and byte total.
    pub fn usage(&self) -> Result<CacheUsage> {
        let mut usage = CacheUsage::default();
        for path in self.entry_paths()? {
            usage.entries += 1;
            usage.bytes += fs::metadata(&path)?.len();
        }
        Ok(usage)
    }

    // --- Persistent tier ---

    fn expired(&self, inserted_at: i64, now: i64) -> bool {
        now.saturating_sub(inserted_at) > self.ttl.as_micros() as i64
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for file in fs::read_dir(entry.path())? {
                    paths.push(file?.path());
                }
            }
        }
        Ok(paths)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(&digest[..2]).join(digest)
    }

    fn write_entry(
        &self,
        key: &str,
        media_type: &str,
        content: &[u8],
        inserted_at: i64,
    ) -> Result<()> {
        let path = self.entry_path(key);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }

        let mut file = File::create(&path)?;
        file.write_all(ENTRY_MAGIC)?;
        file.write_all(&[ENTRY_VERSION])?;

        let media_type_bytes = media_type.as_bytes();
        file.write_all(&(media_type_bytes.len() as u16).to_le_bytes())?;
        file.write_all(media_type_bytes)?;

        file.write_all(&inserted_at.to_le_bytes())?;

        file.write_all(&(content.len() as u64).to_le_bytes())?;
        file.write_all(content)?;
        file.write_all(&crc32fast::hash(content).to_le_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Read an entry; `None` for a missing or expired entry (expired files
    /// are left for the sweep).
    fn read_entry(&self, key: &str) -> Result<Option<(Vec<u8>, String)>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(StoreError::InvalidFormat("invalid cache entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENTRY_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported cache entry version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 2];
        file.read_exact(&mut len_bytes)?;
        let mut media_type_bytes = vec![0u8; u16::from_le_bytes(len_bytes) as usize];
        file.read_exact(&mut media_type_bytes)?;
        let media_type = String::from_utf8_lossy(&media_type_bytes).into_owned();

        let mut inserted_at_bytes = [0u8; 8];
        file.read_exact(&mut inserted_at_bytes)?;
        let inserted_at = i64::from_le_bytes(inserted_at_bytes);
        if self.expired(inserted_at, now_micros()) {
            return Ok(None);
        }

        let mut content_len_bytes = [0u8; 8];
        file.read_exact(&mut content_len_bytes)?;
        let mut content = vec![0u8; u64::from_le_bytes(content_len_bytes) as usize];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&content);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(Some((content, media_type)))
    }
}

/// Remove persistent-tier directories left by older namespace versions.
fn clean_old_namespaces(root: &Path) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(CACHE_NAMESPACE_PREFIX) && name != CACHE_NAMESPACE {
            debug!(namespace = %name, "discarding old cache generation");
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                warn!(namespace = %name, error = %e, "failed to discard old cache generation");
            }
        }
    }
}

/// Read only the insertion timestamp of an entry file.
fn read_inserted_at(path: &Path) -> Result<i64> {
    let mut file = File::open(path)?;

    let mut header = [0u8; 5];
    file.read_exact(&mut header)?;
    if &header[..4] != ENTRY_MAGIC {
        return Err(StoreError::InvalidFormat("invalid cache entry magic".into()));
    }

    let mut len_bytes = [0u8; 2];
    file.read_exact(&mut len_bytes)?;
    let mut media_type = vec![0u8; u16::from_le_bytes(len_bytes) as usize];
    file.read_exact(&mut media_type)?;

    let mut inserted_at_bytes = [0u8; 8];
    file.read_exact(&mut inserted_at_bytes)?;
    Ok(i64::from_le_bytes(inserted_at_bytes))
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StaticFetcher;
    use tempfile::TempDir;

    const HOUR_MICROS: i64 = 60 * 60 * 1_000_000;

    fn open_cache(dir: &TempDir, fetcher: Arc<StaticFetcher>) -> Arc<BlobCache> {
        BlobCache::open(
            CacheConfig {
                root: dir.path().to_path_buf(),
                ..Default::default()
            },
            fetcher,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetches_and_caches_reference() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert("https://cdn.example.com/a.jpg", b"bytes-a".to_vec());
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let source = MediaSource::parse("https://cdn.example.com/a.jpg");
        let handle = cache.get(&source).await;
        assert_eq!(handle.bytes(), Some(&b"bytes-a"[..]));
        assert_eq!(fetcher.fetch_count(), 1);

        // Second read is a memory-tier hit.
        let handle = cache.get(&source).await;
        assert!(handle.is_cached());
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_tier_survives_memory_clear() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert("https://cdn.example.com/a.jpg", b"bytes-a".to_vec());
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let source = MediaSource::parse("https://cdn.example.com/a.jpg");
        cache.get(&source).await;

        // The memory tier is not authoritative; dropping it leaves the
        // persistent tier intact.
        cache.memory.lock().clear();
        let handle = cache.get(&source).await;
        assert_eq!(handle.bytes(), Some(&b"bytes-a"[..]));
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert("https://cdn.example.com/a.jpg", b"fresh".to_vec());
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let source = MediaSource::parse("https://cdn.example.com/a.jpg");
        let key = source.locator();

        // Inserted 23 hours ago: still a hit, no fetch.
        cache
            .write_entry(&key, "image/jpeg", b"aged", now_micros() - 23 * HOUR_MICROS)
            .unwrap();
        let handle = cache.get(&source).await;
        assert_eq!(handle.bytes(), Some(&b"aged"[..]));
        assert_eq!(fetcher.fetch_count(), 0);

        // Inserted 25 hours ago: treated as a miss and refetched.
        cache.memory.lock().clear();
        cache
            .write_entry(&key, "image/jpeg", b"aged", now_micros() - 25 * HOUR_MICROS)
            .unwrap();
        let handle = cache.get(&source).await;
        assert_eq!(handle.bytes(), Some(&b"fresh"[..]));
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_inline_payload_is_decoded_not_fetched() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let source = MediaSource::parse("data:image/png;base64,aGVsbG8=");
        let handle = cache.get(&source).await;
        assert_eq!(handle.bytes(), Some(&b"hello"[..]));
        assert_eq!(handle.media_type(), Some("image/png"));
        assert_eq!(fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_passes_locator_through() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.set_fail(true);
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let source = MediaSource::parse("https://cdn.example.com/missing.jpg");
        let handle = cache.get(&source).await;
        assert!(!handle.is_cached());
        assert_eq!(handle.locator(), "https://cdn.example.com/missing.jpg");
    }

    #[tokio::test]
    async fn test_preload_dedups_and_drains() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        for i in 0..5 {
            fetcher.insert(format!("https://cdn.example.com/{i}.jpg"), vec![i as u8]);
        }
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let mut sources: Vec<MediaSource> = (0..5)
            .map(|i| MediaSource::parse(&format!("https://cdn.example.com/{i}.jpg")))
            .collect();
        // Duplicates are dropped before queueing.
        sources.push(MediaSource::parse("https://cdn.example.com/0.jpg"));

        cache.preload(sources);

        // The drain is detached; give it time to finish.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetcher.fetch_count(), 5);
        assert_eq!(cache.usage().unwrap().entries, 5);
    }

    #[tokio::test]
    async fn test_preload_failures_do_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert("https://cdn.example.com/ok.jpg", b"ok".to_vec());
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        cache.preload(vec![
            MediaSource::parse("https://cdn.example.com/broken.jpg"),
            MediaSource::parse("https://cdn.example.com/ok.jpg"),
        ]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Both were attempted; only the resolvable one landed.
        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(cache.usage().unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, Arc::new(StaticFetcher::new()));

        cache
            .write_entry("old", "image/jpeg", b"old", now_micros() - 30 * HOUR_MICROS)
            .unwrap();
        cache
            .write_entry("new", "image/jpeg", b"new", now_micros())
            .unwrap();

        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.usage().unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_clear_all_releases_both_tiers() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert("https://cdn.example.com/a.jpg", b"bytes".to_vec());
        let cache = open_cache(&dir, Arc::clone(&fetcher));

        let source = MediaSource::parse("https://cdn.example.com/a.jpg");
        cache.get(&source).await;
        cache.clear_all().unwrap();

        assert_eq!(cache.usage().unwrap().entries, 0);
        cache.get(&source).await;
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_old_namespace_generations_are_discarded_at_open() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("asset-cache-v0");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("junk"), b"junk").unwrap();

        let _cache = open_cache(&dir, Arc::new(StaticFetcher::new()));
        assert!(!stale.exists());
        assert!(dir.path().join(CACHE_NAMESPACE).exists());
    }
}
