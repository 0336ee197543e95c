// crates/bedup-core/tests/in_memory_store.rs
// ============================================================================
// Module: In-Memory Tracking Store Tests
// Description: TrackingStore behavior of InMemoryTrackingStore.
// Purpose: Pin down size group windows, update marks, and the event log.
// Dependencies: bedup-core
// ============================================================================

//! ## Overview
//! `TrackingStore` contract tests run against the in-memory store.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use bedup_core::InMemoryTrackingStore;
use bedup_core::InodeKey;
use bedup_core::SizeGroup;
use bedup_core::StoreError;
use bedup_core::Timestamp;
use bedup_core::TrackingStore;
use bedup_core::VolumeId;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_with_volume() -> (InMemoryTrackingStore, VolumeId) {
    let store = InMemoryTrackingStore::new();
    let (fs, created) = store.get_or_create_filesystem("uuid-1").unwrap();
    assert!(created);
    let (volume, created) = store.get_or_create_volume(fs.id, 5, 100).unwrap();
    assert!(created);
    (store, volume.id)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn filesystems_and_volumes_are_created_once() {
    let (store, vol) = store_with_volume();
    let (fs, created) = store.get_or_create_filesystem("uuid-1").unwrap();
    assert!(!created);
    let (again, created) = store.get_or_create_volume(fs.id, 5, 999).unwrap();
    assert!(!created);
    assert_eq!(again.id, vol);
    assert_eq!(again.size_cutoff, 100);
    assert_eq!(store.filesystems().unwrap().len(), 1);
    assert!(store.filesystem_by_uuid("uuid-2").unwrap().is_none());
}

#[test]
fn size_groups_need_two_members_and_an_update() {
    let (store, vol) = store_with_volume();
    for (ino, size) in [(257, 300), (258, 300), (259, 200), (260, 200), (261, 100)] {
        store.upsert_inode(vol, ino, size).unwrap();
    }
    store.clear_updates(&[vol], 200, 200).unwrap();

    assert_eq!(store.max_inode_size(&[vol]).unwrap(), Some(300));
    assert_eq!(store.count_size_groups(&[vol]).unwrap(), 1);
    assert_eq!(store.size_groups(&[vol], u64::MAX, 10).unwrap(), vec![SizeGroup {
        size: 300,
        inode_count: 2,
    }]);

    store.mark_updated(InodeKey::new(vol, 259)).unwrap();
    let groups = store.size_groups(&[vol], 299, 10).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].size, 200);
    assert_eq!(store.size_groups(&[vol], u64::MAX, 1).unwrap()[0].size, 300);
}

#[test]
fn upsert_reports_creation_and_marks_updates() {
    let (store, vol) = store_with_volume();
    assert!(store.upsert_inode(vol, 257, 300).unwrap());
    store.clear_updates(&[vol], u64::MAX, 0).unwrap();
    assert!(!store.upsert_inode(vol, 257, 400).unwrap());
    let inode = store.inode(InodeKey::new(vol, 257)).unwrap().unwrap();
    assert!(inode.has_updates);
    assert_eq!(inode.size, 400);
}

#[test]
fn forgetting_a_volume_keeps_the_event_log() {
    let (store, vol) = store_with_volume();
    let fs_id = store.volume(vol).unwrap().unwrap().fs_id;
    store.upsert_inode(vol, 257, 300).unwrap();
    store.upsert_inode(vol, 258, 300).unwrap();
    let keys = [InodeKey::new(vol, 257), InodeKey::new(vol, 258)];
    let event = store.record_dedup_event(fs_id, 300, Timestamp::from_unix_millis(1_000), &keys).unwrap();

    store.forget_volume(vol).unwrap();
    assert!(store.inode(keys[0]).unwrap().is_none());
    assert_eq!(store.dedup_event_inodes(event).unwrap().len(), 2);
    assert_eq!(store.volumes_of(fs_id).unwrap()[0].inode_count, 0);
}

#[test]
fn events_are_listed_newest_first() {
    let (store, vol) = store_with_volume();
    let fs_id = store.volume(vol).unwrap().unwrap().fs_id;
    let keys = [InodeKey::new(vol, 257), InodeKey::new(vol, 258)];
    let first = store.record_dedup_event(fs_id, 300, Timestamp::from_unix_millis(1_000), &keys).unwrap();
    let second = store.record_dedup_event(fs_id, 500, Timestamp::from_unix_millis(2_000), &keys).unwrap();
    let events = store.dedup_events(10).unwrap();
    assert_eq!(events.iter().map(|event| event.id).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(store.dedup_events(1).unwrap().len(), 1);
}

#[test]
fn unknown_volume_is_not_found() {
    let (store, vol) = store_with_volume();
    let missing = VolumeId::from_raw(vol.get() + 100).unwrap();
    assert!(matches!(store.upsert_inode(missing, 1, 1), Err(StoreError::NotFound(_))));
    assert!(matches!(store.record_volume_path(missing, Path::new("/mnt")), Err(StoreError::NotFound(_))));
}
