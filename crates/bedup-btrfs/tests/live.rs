// crates/bedup-btrfs/tests/live.rs
// ============================================================================
// Module: Live btrfs Tests
// Description: Backend checks against a real btrfs mount.
// Purpose: Exercise ioctls that cannot be faked.
// Dependencies: bedup-btrfs, bedup-core, tempfile
// ============================================================================

//! These tests need a writable btrfs directory named by `BEDUP_TEST_BTRFS`
//! and root privileges for tree searches and immutable flags. Run with
//! `--ignored`.

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

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use bedup_btrfs::BtrfsBackend;
use bedup_core::CloneOutcome;
use bedup_core::VolumeBackend;
use bedup_core::is_regular_file;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn btrfs_dir() -> PathBuf {
    PathBuf::from(std::env::var("BEDUP_TEST_BTRFS").expect("BEDUP_TEST_BTRFS names a btrfs directory"))
}

fn write_file(dir: &Path, name: &str, byte: u8, len: usize) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, vec![byte; len]).unwrap();
    path
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
#[ignore = "requires a btrfs mount and root"]
fn volume_probe_reports_uuid_and_root() {
    let mut backend = BtrfsBackend::new();
    let probe = backend.open_volume(&btrfs_dir()).unwrap();
    assert_eq!(probe.fs_uuid.len(), 36);
    assert!(probe.root_id >= 5);
    assert!(backend.root_generation(probe.handle).unwrap() > 0);
    backend.close_volume(probe.handle);
}

#[test]
#[ignore = "requires a btrfs mount and root"]
fn new_files_show_up_in_the_tree_search() {
    let dir = tempfile::tempdir_in(btrfs_dir()).unwrap();
    let mut backend = BtrfsBackend::new();
    let probe = backend.open_volume(&btrfs_dir()).unwrap();
    let generation = backend.root_generation(probe.handle).unwrap();
    write_file(dir.path(), "fresh", 7, 64 * 1024);
    sync_filesystems();

    let items: Vec<_> = backend
        .inode_items(probe.handle, generation)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let fresh = items.iter().find(|item| is_regular_file(item.mode) && item.size == 64 * 1024);
    let fresh = fresh.expect("new file is listed");
    let path = backend.lookup_ino_path(probe.handle, fresh.ino).unwrap();
    assert!(path.ends_with("fresh"));
}

#[test]
#[ignore = "requires a btrfs mount and root"]
fn clone_then_check_first_reports_already_shared() {
    let dir = tempfile::tempdir_in(btrfs_dir()).unwrap();
    let src = write_file(dir.path(), "src", 3, 128 * 1024);
    let dest = write_file(dir.path(), "dest", 3, 128 * 1024);
    let backend = BtrfsBackend::new();
    let src = backend.open_path_rw(&src).unwrap();
    let dest = backend.open_path_rw(&dest).unwrap();

    assert!(!dest.set_immutable(true).unwrap());
    assert_eq!(backend.clone_file(dest.as_ref(), src.as_ref()).unwrap(), CloneOutcome::Cloned);
    assert!(dest.set_immutable(false).unwrap());
    assert_eq!(dest.extents().unwrap(), src.extents().unwrap());
    assert_eq!(backend.clone_file(dest.as_ref(), src.as_ref()).unwrap(), CloneOutcome::AlreadyShared);
    backend.defragment(src.as_ref()).unwrap();
}

#[test]
#[ignore = "requires a btrfs mount and root"]
fn own_descriptors_are_not_writers() {
    let dir = tempfile::tempdir_in(btrfs_dir()).unwrap();
    let path = write_file(dir.path(), "mine", 1, 4096);
    let backend = BtrfsBackend::new();
    let files = vec![backend.open_path_rw(&path).unwrap()];
    assert!(backend.writers_among(&files).unwrap().is_empty());
}

/// Commits pending writes so the new inodes reach the searched tree.
fn sync_filesystems() {
    std::process::Command::new("sync").status().unwrap();
}
