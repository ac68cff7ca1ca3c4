//! Batch migration through the adapter: write-back, tally, and per-record
//! failure isolation.

use profile_store::{
    migrate_all, AdapterConfig, InMemoryTransport, MigrationReport, RecordStore, RemoteStore,
    StorageAdapter, CURRENT_SCHEMA_VERSION,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn legacy(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": "active",
        "contract": { "basePrice": 10000 },
        "personalInfo": { "name": format!("name-{id}") }
    })
}

async fn local_only_adapter(dir: &TempDir) -> StorageAdapter {
    let local = RecordStore::open(dir.path()).unwrap();
    let remote = RemoteStore::connect(Arc::new(InMemoryTransport::new().with_failing_handshake()));
    let (adapter, _rx) = StorageAdapter::connect(local, remote, AdapterConfig::default()).await;
    adapter
}

#[tokio::test]
async fn test_batch_migrates_and_writes_back() {
    let dir = TempDir::new().unwrap();
    let adapter = local_only_adapter(&dir).await;

    let dump = json!([legacy("m1"), legacy("m2")]).to_string();
    adapter.local().import_json(&dump).await.unwrap();

    let report = migrate_all(&adapter).await;
    assert_eq!(
        report,
        MigrationReport {
            success_count: 2,
            error_count: 0
        }
    );

    for record in adapter.get_all().await {
        assert_eq!(record.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(record.pricing.as_ref().unwrap().packages.len(), 3);
        assert!(record.availability.is_some());
    }
}

#[tokio::test]
async fn test_batch_isolates_per_record_failures() {
    let dir = TempDir::new().unwrap();
    let adapter = local_only_adapter(&dir).await;

    // Record #3 carries no id, so its write-back cannot be addressed; the
    // batch must still migrate the other four.
    let dump = json!([
        legacy("m1"),
        legacy("m2"),
        { "status": "active", "contract": { "basePrice": 10000 } },
        legacy("m4"),
        legacy("m5"),
    ])
    .to_string();
    adapter.local().import_json(&dump).await.unwrap();

    let report = migrate_all(&adapter).await;
    assert_eq!(
        report,
        MigrationReport {
            success_count: 4,
            error_count: 1
        }
    );

    let migrated: Vec<_> = adapter
        .get_all()
        .await
        .into_iter()
        .filter(|r| r.schema_version == CURRENT_SCHEMA_VERSION)
        .collect();
    assert_eq!(migrated.len(), 4);
}

#[tokio::test]
async fn test_already_migrated_records_count_as_success() {
    let dir = TempDir::new().unwrap();
    let adapter = local_only_adapter(&dir).await;

    let dump = json!([legacy("m1")]).to_string();
    adapter.local().import_json(&dump).await.unwrap();

    migrate_all(&adapter).await;
    let second = migrate_all(&adapter).await;
    assert_eq!(
        second,
        MigrationReport {
            success_count: 1,
            error_count: 0
        }
    );
}

#[tokio::test]
async fn test_batch_in_hybrid_mode_updates_both_stores() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(InMemoryTransport::new());
    let local = RecordStore::open(dir.path()).unwrap();
    let remote = RemoteStore::connect(transport.clone());
    let (adapter, _rx) = StorageAdapter::connect(local, remote, AdapterConfig::default()).await;

    // The legacy record lives in both stores under the same id.
    let record: profile_store::Record = serde_json::from_value(legacy("m1")).unwrap();
    adapter.remote().save(record.clone()).await.unwrap();
    adapter.local().save(record).await.unwrap();

    let report = migrate_all(&adapter).await;
    assert_eq!(report.success_count, 1);

    let remote_side = adapter
        .remote()
        .get(&profile_store::RecordId::from("m1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote_side.schema_version, CURRENT_SCHEMA_VERSION);

    let local_side = adapter
        .local()
        .get(&profile_store::RecordId::from("m1"))
        .await
        .unwrap();
    assert_eq!(local_side.schema_version, CURRENT_SCHEMA_VERSION);
}
