//! Volume lifecycle tests: load, accounting, expiry, remote binding, compaction

use needlestore::backend::{
    BackendStorage, BackendStorageFile, DiskFile, Properties, S3BackendStorage,
    WritableBackendStorageFile,
};
use needlestore::common::METRICS;
use needlestore::proto::StorageBackend;
use needlestore::volume::{
    read_super_block, MemoryNeedleMap, NeedleMapSnapshot, NeedleMapper, RemoteFile,
    ReplicaPlacement, Ttl, TtlUnit, VolumeFileStat, VolumeInfo, CURRENT_VERSION,
};
use needlestore::{BackendRegistry, Error, Volume};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const MINUTE: u64 = 60;

fn placement(s: &str) -> Option<ReplicaPlacement> {
    Some(s.parse().unwrap())
}

/// Index with three puts and one delete: 600 content bytes, 200 deleted.
fn write_index(path: &Path) {
    let mut nm = MemoryNeedleMap::load(path).unwrap();
    nm.put(1, 8, 100).unwrap();
    nm.put(2, 112, 200).unwrap();
    nm.put(3, 320, 300).unwrap();
    nm.delete(2).unwrap();
    nm.close().unwrap();
}

#[tokio::test]
async fn test_accounting_follows_index() {
    let dir = TempDir::new().unwrap();
    write_index(&dir.path().join("acct_1.idx"));

    let registry = BackendRegistry::new();
    let v = Volume::new(
        dir.path(),
        "acct",
        1,
        placement("000"),
        Some(Ttl::EMPTY),
        &registry,
    )
    .await
    .unwrap();

    assert_eq!(
        v.accounting().await,
        NeedleMapSnapshot {
            content_size: 600,
            deleted_size: 200,
            file_count: 3,
            deleted_count: 1,
            max_file_key: 3,
            index_file_size: 64,
        }
    );
    assert!((v.garbage_level().await - 200.0 / 600.0).abs() < f64::EPSILON);

    let stat = v.file_stat().await;
    assert_eq!(stat.dat_size, 8);
    assert_eq!(stat.idx_size, 64);
    assert!(stat.modified.is_some());

    let info = v.to_volume_information_message().await;
    assert_eq!(info.id, 1);
    assert_eq!(info.collection, "acct");
    assert_eq!(info.size, 8);
    assert_eq!(info.file_count, 3);
    assert_eq!(info.delete_count, 1);
    assert_eq!(info.deleted_byte_count, 200);
    assert_eq!(info.version, CURRENT_VERSION as u32);
    assert!(!info.read_only);
    assert!(info.remote_storage_name.is_empty());

    v.close().await;
    assert_eq!(v.accounting().await, NeedleMapSnapshot::default());
    assert_eq!(v.file_stat().await, VolumeFileStat::default());
}

#[tokio::test]
async fn test_close_moves_gauge_once() {
    let dir = TempDir::new().unwrap();
    let registry = BackendRegistry::new();
    let gauge = METRICS.volume_counter("gauge_once", "volume");

    let v = Volume::new(
        dir.path(),
        "gauge_once",
        1,
        placement("000"),
        Some(Ttl::EMPTY),
        &registry,
    )
    .await
    .unwrap();
    assert_eq!(gauge.get(), 1);

    v.close().await;
    v.close().await;
    assert_eq!(gauge.get(), 0);
}

#[tokio::test]
async fn test_expired_conditions_are_independent() {
    let dir = TempDir::new().unwrap();
    let registry = BackendRegistry::new();
    let limit = 30 * 1024 * 1024 * 1024;

    write_index(&dir.path().join("ttl_1.idx"));
    let with_content = Volume::new(
        dir.path(),
        "ttl",
        1,
        placement("000"),
        Some(Ttl::new(1, TtlUnit::Minute)),
        &registry,
    )
    .await
    .unwrap();
    let later = with_content.last_modified_ts_seconds().await + 10 * MINUTE;

    assert!(with_content.expired_at(limit, later).await);
    // no size limit announced yet
    assert!(!with_content.expired_at(0, later).await);
    // not enough time has passed
    assert!(!with_content.expired_at(limit, later - 9 * MINUTE).await);

    let empty = Volume::new(
        dir.path(),
        "ttl",
        2,
        placement("000"),
        Some(Ttl::new(1, TtlUnit::Minute)),
        &registry,
    )
    .await
    .unwrap();
    assert!(!empty.expired_at(limit, later).await);

    write_index(&dir.path().join("ttl_3.idx"));
    let no_ttl = Volume::new(
        dir.path(),
        "ttl",
        3,
        placement("000"),
        Some(Ttl::EMPTY),
        &registry,
    )
    .await
    .unwrap();
    assert!(no_ttl.content_size().await > 0);
    assert!(!no_ttl.expired_at(limit, later).await);
    assert!(!no_ttl.expired_long_enough_at(5, u64::MAX / 2).await);

    for v in [with_content, empty, no_ttl] {
        v.close().await;
    }
}

#[tokio::test]
async fn test_removal_waits_for_capped_delay() {
    let dir = TempDir::new().unwrap();
    let registry = BackendRegistry::new();
    let v = Volume::new(
        dir.path(),
        "",
        1,
        placement("000"),
        Some(Ttl::new(100, TtlUnit::Minute)),
        &registry,
    )
    .await
    .unwrap();
    let modified = v.last_modified_ts_seconds().await;

    assert!(!v.expired_long_enough_at(5, modified + 100 * MINUTE).await);
    assert!(!v.expired_long_enough_at(5, modified + 105 * MINUTE).await);
    assert!(v.expired_long_enough_at(5, modified + 105 * MINUTE + 1).await);
    v.close().await;
}

#[tokio::test]
async fn test_memory_remote_binding_is_read_only() {
    let dir = TempDir::new().unwrap();
    let registry = BackendRegistry::with_default_factories();
    registry
        .load_from_remote(&[StorageBackend {
            r#type: "memory".into(),
            id: "default".into(),
            properties: HashMap::new(),
        }])
        .unwrap();

    let header = [CURRENT_VERSION, 1, 3, 3, 0, 7, 0, 0];
    let remote = registry.get("memory").unwrap().new_storage_file("/pics_9.dat");
    remote
        .as_writable()
        .unwrap()
        .write_at(&header, 0)
        .await
        .unwrap();

    VolumeInfo {
        version: 3,
        files: vec![RemoteFile {
            backend_type: "memory".into(),
            backend_id: "default".into(),
            key: "pics_9.dat".into(),
            file_size: header.len() as u64,
            modified_time: 1_700_000_000,
        }],
    }
    .save(dir.path().join("pics_9.vif"))
    .unwrap();

    let v = Volume::new(dir.path(), "pics", 9, None, None, &registry)
        .await
        .unwrap();

    assert!(v.is_read_only());
    assert!(!dir.path().join("pics_9.dat").exists());
    assert_eq!(v.last_modified_ts_seconds().await, 1_700_000_000);
    assert_eq!(v.super_block().await.compaction_revision, 7);
    assert_eq!(v.ttl().await, Ttl::new(3, TtlUnit::Day));
    assert_eq!(&v.read_range(0, 64).await.unwrap()[..], &header[..]);

    let info = v.to_volume_information_message().await;
    assert!(info.read_only);
    assert_eq!(info.remote_storage_name, "memory.default");
    assert_eq!(info.remote_storage_key, "pics_9.dat");
    assert_eq!(info.replica_placement, 1);
    assert_eq!(info.ttl, (3 << 8) | 3);
    v.close().await;
}

#[tokio::test]
async fn test_s3_remote_binding_rejects_compaction_commit() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemory::new());
    store
        .put(
            &ObjectPath::from("7.dat"),
            PutPayload::from(vec![CURRENT_VERSION, 0, 0, 0, 0, 0, 0, 0]),
        )
        .await
        .unwrap();

    let mut properties = HashMap::new();
    properties.insert("bucket".to_string(), "volumes".to_string());
    properties.insert("region".to_string(), "us-east-1".to_string());
    let storage =
        S3BackendStorage::with_client(&Properties::new(properties), "default", store).unwrap();
    assert_eq!(storage.bucket(), "volumes");

    let registry = BackendRegistry::new();
    registry.install_storage(Arc::new(storage));

    VolumeInfo {
        version: 3,
        files: vec![RemoteFile {
            backend_type: "s3".into(),
            backend_id: "default".into(),
            key: "/7.dat".into(),
            ..Default::default()
        }],
    }
    .save(dir.path().join("7.vif"))
    .unwrap();

    let v = Volume::new(dir.path(), "", 7, None, None, &registry)
        .await
        .unwrap();
    assert!(v.is_read_only());
    assert_eq!(v.file_stat().await.dat_size, 8);

    v.begin_compaction().await.unwrap();
    let err = v.commit_compaction().await.unwrap_err();
    assert!(err.is_unsupported());
    assert!(!v.is_compacting().await);
    assert_eq!(v.super_block().await.compaction_revision, 0);
    v.close().await;
}

#[tokio::test]
async fn test_stat_failure_reports_zero_sizes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemory::new());
    let location = ObjectPath::from("vanish_2.dat");
    store
        .put(
            &location,
            PutPayload::from(vec![CURRENT_VERSION, 0, 0, 0, 0, 0, 0, 0]),
        )
        .await
        .unwrap();

    let mut properties = HashMap::new();
    properties.insert("bucket".to_string(), "volumes".to_string());
    let storage =
        S3BackendStorage::with_client(&Properties::new(properties), "default", store.clone())
            .unwrap();
    let registry = BackendRegistry::new();
    registry.install_storage(Arc::new(storage));

    VolumeInfo {
        version: 3,
        files: vec![RemoteFile {
            backend_type: "s3".into(),
            backend_id: "default".into(),
            key: "vanish_2.dat".into(),
            ..Default::default()
        }],
    }
    .save(dir.path().join("vanish_2.vif"))
    .unwrap();

    let v = Volume::new(dir.path(), "vanish", 2, None, None, &registry)
        .await
        .unwrap();
    assert_eq!(v.file_stat().await.dat_size, 8);

    store.delete(&location).await.unwrap();

    assert_eq!(v.file_stat().await, VolumeFileStat::default());
    let info = v.to_volume_information_message().await;
    assert_eq!(info.size, 0);
    assert_eq!(info.modified_at_second, 0);
    assert_eq!(info.remote_storage_name, "s3.default");
    v.close().await;
}

#[tokio::test]
async fn test_unknown_remote_backend_fails_load() {
    let dir = TempDir::new().unwrap();
    let gauge = METRICS.volume_counter("orphan", "volume");
    VolumeInfo {
        version: 3,
        files: vec![RemoteFile {
            backend_type: "s3".into(),
            backend_id: "archive".into(),
            key: "orphan_1.dat".into(),
            ..Default::default()
        }],
    }
    .save(dir.path().join("orphan_1.vif"))
    .unwrap();

    let registry = BackendRegistry::new();
    let v = Volume::unloaded(dir.path(), "orphan", 1, None, None);
    let err = v.load(&registry).await.unwrap_err();
    assert!(matches!(err, Error::BackendNotFound(ref name) if name == "s3.archive"));
    assert!(!v.is_loaded().await);
    assert_eq!(gauge.get(), 0);
}

#[tokio::test]
async fn test_failed_remote_load_leaves_volume_writable() {
    let dir = TempDir::new().unwrap();
    let registry = BackendRegistry::with_default_factories();
    registry
        .load_from_remote(&[StorageBackend {
            r#type: "memory".into(),
            id: "default".into(),
            properties: HashMap::new(),
        }])
        .unwrap();

    // bound to an object that was never uploaded
    let vif = dir.path().join("stale_4.vif");
    VolumeInfo {
        version: 3,
        files: vec![RemoteFile {
            backend_type: "memory".into(),
            backend_id: "default".into(),
            key: "stale_4.dat".into(),
            ..Default::default()
        }],
    }
    .save(&vif)
    .unwrap();

    let v = Volume::unloaded(
        dir.path(),
        "stale",
        4,
        placement("000"),
        Some(Ttl::EMPTY),
    );
    assert!(v.load(&registry).await.is_err());
    assert!(!v.is_read_only());
    assert!(v.remote_file().await.is_none());

    std::fs::remove_file(&vif).unwrap();
    v.load(&registry).await.unwrap();
    assert!(!v.is_read_only());
    assert!(dir.path().join("stale_4.dat").exists());
    v.close().await;
}

#[tokio::test]
async fn test_compaction_revision_wraps() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("wrap_1.dat"),
        [CURRENT_VERSION, 0, 0, 0, 0xff, 0xff, 0, 0],
    )
    .unwrap();

    let registry = BackendRegistry::new();
    let v = Volume::new(dir.path(), "wrap", 1, None, None, &registry)
        .await
        .unwrap();
    assert_eq!(v.super_block().await.compaction_revision, u16::MAX);

    let begun = v.begin_compaction().await.unwrap();
    assert_eq!(begun.last_compact_revision, u16::MAX);
    assert_eq!(v.commit_compaction().await.unwrap(), 0);
    v.close().await;

    let file = DiskFile::open_read_only(dir.path().join("wrap_1.dat")).unwrap();
    assert_eq!(read_super_block(&file).await.unwrap().compaction_revision, 0);
}

#[tokio::test]
async fn test_index_reload_after_reopen() {
    let dir = TempDir::new().unwrap();
    let registry = BackendRegistry::new();

    let v = Volume::new(
        dir.path(),
        "reopen",
        1,
        placement("001"),
        Some(Ttl::EMPTY),
        &registry,
    )
    .await
    .unwrap();
    assert!(v.need_to_replicate().await);
    v.close().await;

    write_index(&dir.path().join("reopen_1.idx"));

    let v = Volume::new(dir.path(), "reopen", 1, None, None, &registry)
        .await
        .unwrap();
    assert_eq!(v.file_count().await, 3);
    assert_eq!(v.max_file_key().await, 3);
    assert_eq!(v.replica_placement().await.copy_count(), 2);
    v.close().await;
}
