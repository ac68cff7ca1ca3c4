//! # Profile Store
//!
//! The data-synchronization layer of a marketplace application: a hybrid
//! storage adapter that reconciles a durable on-device record store with a
//! networked authoritative store, a lazy schema migrator that upgrades
//! legacy records on read, and a two-tier binary asset cache with
//! time-based expiry.
//!
//! ## Core Concepts
//!
//! - **Records**: model profiles, id-keyed, stored in both tiers
//! - **Adapter**: one API with automatic fallback and dedup-merge reads
//! - **Migration**: idempotent, presence-guarded schema upgrades
//! - **Asset cache**: memory tier over a persistent tier with 24 h TTL
//!
//! ## Example
//!
//! ```ignore
//! use profile_store::{
//!     AdapterConfig, InMemoryTransport, RecordStore, RemoteStore, StorageAdapter,
//! };
//! use std::sync::Arc;
//!
//! let local = RecordStore::open("./profile-data")?;
//! let remote = RemoteStore::connect(Arc::new(InMemoryTransport::new()));
//! let (adapter, _backfill) =
//!     StorageAdapter::connect(local, remote, AdapterConfig::default()).await;
//!
//! let id = adapter.save(record).await?;
//! let profiles = adapter.get_active().await;
//! ```
//!
//! Everything is constructed explicitly and passed to whatever needs it;
//! the crate keeps no ambient global state.

pub mod adapter;
pub mod cache;
pub mod error;
pub mod local;
pub mod migrate;
pub mod remote;
pub mod types;

// Re-exports
pub use adapter::{AdapterConfig, AdapterMode, BackfillOutcome, StorageAdapter};
pub use cache::{
    AssetFetcher, AssetHandle, BlobCache, CacheConfig, CacheUsage, FetchedAsset, HttpFetcher,
    StaticFetcher,
};
pub use error::{Result, StoreError};
pub use local::{RecordStore, StorageInfo};
pub use migrate::{migrate, migrate_all, needs_migration, MigrationReport};
pub use remote::{
    ChangeNotice, InMemoryTransport, RemoteStore, RemoteTransport, SubscriptionCallback,
    SubscriptionHandle,
};
pub use types::*;
