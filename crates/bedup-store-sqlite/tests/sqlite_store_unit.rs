// crates/bedup-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Tracking Store Unit Tests
// Description: Targeted tests for the SQLite tracking store.
// Purpose: Validate path safety, schema versioning, persistence, size
//          grouping, and the dedup event log.
// ============================================================================

//! ## Overview
//! Unit-level tests for `SQLite` tracking store behavior:
//! - Path safety checks (empty/component/directory rejection)
//! - Schema version validation
//! - Durable state across reopen
//! - Size group selection and update windows
//! - Dedup event history surviving volume resets

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use bedup_core::Durability;
use bedup_core::InodeKey;
use bedup_core::SizeGroup;
use bedup_core::StoreError;
use bedup_core::Timestamp;
use bedup_core::TrackingStore;
use bedup_core::VolumeId;
use bedup_store_sqlite::SqliteStoreConfig;
use bedup_store_sqlite::SqliteStoreError;
use bedup_store_sqlite::SqliteStoreMode;
use bedup_store_sqlite::SqliteSyncMode;
use bedup_store_sqlite::SqliteTrackingStore;
use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_for(path: &Path) -> SqliteTrackingStore {
    SqliteTrackingStore::new(SqliteStoreConfig::new(path)).unwrap()
}

fn volume_in(store: &SqliteTrackingStore, uuid: &str, root_id: u64) -> VolumeId {
    let (fs, _) = store.get_or_create_filesystem(uuid).unwrap();
    let (vol, _) = store.get_or_create_volume(fs.id, root_id, 8 * 1024 * 1024).unwrap();
    vol.id
}

// ============================================================================
// SECTION: Path Safety
// ============================================================================

#[test]
fn sqlite_store_rejects_directory_path() {
    let temp = TempDir::new().unwrap();
    let Err(err) = SqliteTrackingStore::new(SqliteStoreConfig::new(temp.path())) else {
        panic!("expected invalid directory path to fail");
    };
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn sqlite_store_rejects_empty_path() {
    let Err(err) = SqliteTrackingStore::new(SqliteStoreConfig::new(PathBuf::new())) else {
        panic!("expected empty path to fail");
    };
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn sqlite_store_rejects_overlong_component() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("a".repeat(300));
    let Err(err) = SqliteTrackingStore::new(SqliteStoreConfig::new(path)) else {
        panic!("expected overlong component to fail");
    };
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn sqlite_store_creates_missing_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("bedup").join("db.sqlite");
    let _store = store_for(&path);
    assert!(path.is_file());
}

// ============================================================================
// SECTION: Schema Versioning
// ============================================================================

#[test]
fn sqlite_store_rejects_unknown_schema_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE store_meta (version INTEGER NOT NULL);").unwrap();
    conn.execute("INSERT INTO store_meta (version) VALUES (?1)", params![999_i64]).unwrap();
    drop(conn);

    let Err(err) = SqliteTrackingStore::new(SqliteStoreConfig::new(&path)) else {
        panic!("expected schema mismatch to fail");
    };
    assert!(matches!(err, SqliteStoreError::VersionMismatch(_)));
}

#[test]
fn sqlite_store_error_maps_to_store_error() {
    let mapped: StoreError = SqliteStoreError::NotFound("volume 3".to_string()).into();
    assert_eq!(mapped, StoreError::NotFound("volume 3".to_string()));
    let mapped: StoreError = SqliteStoreError::Db("locked".to_string()).into();
    assert_eq!(mapped, StoreError::Store("locked".to_string()));
}

// ============================================================================
// SECTION: Persistence
// ============================================================================

#[test]
fn sqlite_store_state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.sqlite");
    let vol_id = {
        let store = store_for(&path);
        let vol_id = volume_in(&store, "fs-a", 256);
        assert!(store.upsert_inode(vol_id, 300, 4096).unwrap());
        let (mut volume, created) = store
            .get_or_create_volume(store.filesystem_by_uuid("fs-a").unwrap().unwrap().id, 256, 0)
            .unwrap();
        assert!(!created);
        volume.last_tracked_generation = 77;
        volume.last_tracked_size_cutoff = Some(volume.size_cutoff);
        store.save_volume(&volume).unwrap();
        store.record_volume_path(vol_id, Path::new("/mnt/a")).unwrap();
        vol_id
    };

    let store = store_for(&path);
    let fs = store.filesystem_by_uuid("fs-a").unwrap().unwrap();
    let summaries = store.volumes_of(fs.id).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].record.id, vol_id);
    assert_eq!(summaries[0].record.last_tracked_generation, 77);
    assert_eq!(summaries[0].record.last_tracked_size_cutoff, Some(8 * 1024 * 1024));
    assert_eq!(summaries[0].inode_count, 1);
    assert_eq!(summaries[0].last_known_path, Some(PathBuf::from("/mnt/a")));
}

#[test]
fn sqlite_store_last_known_path_follows_most_recent_use() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("db.sqlite"));
    let vol_id = volume_in(&store, "fs-a", 256);
    store.record_volume_path(vol_id, Path::new("/mnt/a")).unwrap();
    store.record_volume_path(vol_id, Path::new("/mnt/b")).unwrap();
    store.record_volume_path(vol_id, Path::new("/mnt/a")).unwrap();

    let fs = store.filesystem_by_uuid("fs-a").unwrap().unwrap();
    let summaries = store.volumes_of(fs.id).unwrap();
    assert_eq!(summaries[0].last_known_path, Some(PathBuf::from("/mnt/a")));
}

#[test]
fn sqlite_store_rejects_unknown_rows() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("db.sqlite"));
    let vol_id = volume_in(&store, "fs-a", 256);
    let missing = VolumeId::from_raw(vol_id.get() + 100).unwrap();

    assert!(matches!(store.upsert_inode(missing, 1, 1), Err(StoreError::NotFound(_))));
    assert!(matches!(store.forget_volume(missing), Err(StoreError::NotFound(_))));
    assert!(matches!(
        store.record_volume_path(missing, Path::new("/mnt")),
        Err(StoreError::NotFound(_))
    ));
    store.delete_inode(InodeKey::new(missing, 1)).unwrap();
    store.mark_updated(InodeKey::new(missing, 1)).unwrap();
}

#[test]
fn sqlite_store_rejects_values_beyond_i64() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("db.sqlite"));
    let vol_id = volume_in(&store, "fs-a", 256);
    assert!(matches!(store.upsert_inode(vol_id, u64::MAX, 1), Err(StoreError::Invalid(_))));
}

// ============================================================================
// SECTION: Size Groups
// ============================================================================

#[test]
fn sqlite_store_size_groups_need_an_updated_member() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("db.sqlite"));
    let a = volume_in(&store, "fs-a", 256);
    let b = volume_in(&store, "fs-a", 257);
    for (vol, ino, size) in [(a, 300, 4096), (b, 300, 4096), (a, 301, 8192), (a, 302, 8192), (a, 303, 100)] {
        store.upsert_inode(vol, ino, size).unwrap();
    }

    let vols = [a, b];
    assert_eq!(store.max_inode_size(&vols).unwrap(), Some(8192));
    assert_eq!(store.count_size_groups(&vols).unwrap(), 2);
    assert_eq!(store.size_groups(&vols, u64::MAX, 10).unwrap(), vec![
        SizeGroup {
            size: 8192,
            inode_count: 2,
        },
        SizeGroup {
            size: 4096,
            inode_count: 2,
        },
    ]);
    assert_eq!(store.size_groups(&vols, 5000, 10).unwrap().len(), 1);
    assert_eq!(store.size_groups(&[a], u64::MAX, 10).unwrap().len(), 1);

    store.clear_updates(&vols, 8192, 4096).unwrap();
    assert_eq!(store.count_size_groups(&vols).unwrap(), 0);

    store.mark_updated(InodeKey::new(b, 300)).unwrap();
    assert_eq!(store.count_size_groups(&vols).unwrap(), 1);
    assert!(store.size_groups(&[], u64::MAX, 10).unwrap().is_empty());
    assert_eq!(store.max_inode_size(&[]).unwrap(), None);
}

#[test]
fn sqlite_store_hashes_keep_every_bit() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("db.sqlite"));
    let vol = volume_in(&store, "fs-a", 256);
    store.upsert_inode(vol, 300, 4096).unwrap();

    let mut inode = store.inodes_of_size(&[vol], 4096).unwrap().remove(0);
    inode.mini_hash = Some(u64::MAX - 1);
    inode.fiemap_hash = Some(1);
    store.save_inode_hashes(&inode).unwrap();

    let loaded = store.inodes_of_size(&[vol], 4096).unwrap();
    assert_eq!(loaded, vec![inode]);
}

// ============================================================================
// SECTION: Dedup Events
// ============================================================================

#[test]
fn sqlite_store_events_are_newest_first_and_survive_forget() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("db.sqlite"));
    let vol = volume_in(&store, "fs-a", 256);
    let fs = store.filesystem_by_uuid("fs-a").unwrap().unwrap();
    store.upsert_inode(vol, 300, 4096).unwrap();
    store.upsert_inode(vol, 301, 4096).unwrap();

    let keys = [InodeKey::new(vol, 300), InodeKey::new(vol, 301)];
    let first = store.record_dedup_event(fs.id, 4096, Timestamp::from_unix_millis(1_000), &keys).unwrap();
    let second = store.record_dedup_event(fs.id, 8192, Timestamp::from_unix_millis(2_000), &keys[.. 1]).unwrap();

    store.forget_volume(vol).unwrap();
    assert!(store.inodes_of_size(&[vol], 4096).unwrap().is_empty());

    let events = store.dedup_events(10).unwrap();
    assert_eq!(events.iter().map(|event| event.id).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(events[1].inode_count, 2);
    assert_eq!(events[1].estimated_space_gain(), 4096);
    assert_eq!(store.dedup_events(1).unwrap().len(), 1);

    let members = store.dedup_event_inodes(first).unwrap();
    assert_eq!(members.iter().map(|member| member.ino).collect::<Vec<_>>(), vec![300, 301]);
}

#[test]
fn sqlite_store_event_ids_are_not_reused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.sqlite");
    let store = store_for(&path);
    let vol = volume_in(&store, "fs-a", 256);
    let fs = store.filesystem_by_uuid("fs-a").unwrap().unwrap();
    store.upsert_inode(vol, 300, 4096).unwrap();
    let keys = [InodeKey::new(vol, 300)];

    store.record_dedup_event(fs.id, 4096, Timestamp::from_unix_millis(1_000), &keys).unwrap();
    let newest = store.record_dedup_event(fs.id, 4096, Timestamp::from_unix_millis(2_000), &keys).unwrap();

    let conn = Connection::open(&path).unwrap();
    conn.execute("DELETE FROM dedup_event_inodes WHERE event_id = ?1", params![newest.get()]).unwrap();
    conn.execute("DELETE FROM dedup_events WHERE id = ?1", params![newest.get()]).unwrap();
    drop(conn);

    let next = store.record_dedup_event(fs.id, 4096, Timestamp::from_unix_millis(3_000), &keys).unwrap();
    assert!(next.get() > newest.get());
    let ids: Vec<i64> = store.dedup_events(10).unwrap().iter().map(|event| event.id.get()).collect();
    assert_eq!(ids, vec![next.get(), newest.get() - 1]);
}

// ============================================================================
// SECTION: Journal Mode and Concurrency
// ============================================================================

#[test]
fn sqlite_store_sets_delete_mode() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.sqlite");
    let config = SqliteStoreConfig {
        path: path.clone(),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Delete,
        sync_mode: SqliteSyncMode::Full,
    };
    let store = SqliteTrackingStore::new(config).unwrap();
    store.set_durability(Durability::Relaxed).unwrap();
    store.set_durability(Durability::Full).unwrap();

    let conn = Connection::open(&path).unwrap();
    let mode: String = conn.query_row("PRAGMA journal_mode", params![], |row| row.get(0)).unwrap();
    assert_eq!(mode.to_lowercase(), "delete");
}

#[test]
fn sqlite_store_supports_concurrent_writes() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(store_for(&temp.path().join("db.sqlite")));
    let vol = volume_in(&store, "fs-a", 256);

    let mut handles = Vec::new();
    for i in 0 .. 4_u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store.upsert_inode(vol, 300 + i, 4096).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.inodes_of_size(&[vol], 4096).unwrap().len(), 4);
}
