//! Asset fetching behind the blob cache.

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Bytes fetched for a locator, with their media type.
#[derive(Clone, Debug)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Resolves a reference locator to its bytes.
///
/// The cache depends only on this trait; the application injects whatever
/// client fits its environment.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

/// HTTP fetcher over a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StoreError::AssetFetch(e.to_string()))?;

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::AssetFetch(e.to_string()))?
            .to_vec();

        Ok(FetchedAsset { bytes, media_type })
    }
}

/// Map-backed fetcher for tests and local development. Counts fetches and
/// can be switched to fail.
pub struct StaticFetcher {
    assets: RwLock<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
    fail: AtomicBool,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            assets: RwLock::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.assets.write().insert(url.into(), bytes);
    }

    /// How many fetches reached this fetcher (cache misses).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::AssetFetch("fetch disabled".into()));
        }
        self.assets
            .read()
            .get(url)
            .map(|bytes| FetchedAsset {
                bytes: bytes.clone(),
                media_type: "image/jpeg".to_string(),
            })
            .ok_or_else(|| StoreError::AssetFetch(format!("no asset at {url}")))
    }
}
