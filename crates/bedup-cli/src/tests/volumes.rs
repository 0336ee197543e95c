// crates/bedup-cli/src/tests/volumes.rs
// ============================================================================
// Module: Volume Listing Tests
// Description: Tests for the show-vols renderer.
// Purpose: Ensure devices, mounts, and tracked volumes join correctly.
// Dependencies: bedup-cli volumes, bedup-btrfs, bedup-core
// ============================================================================

//! Rendering of the `show-vols` listing.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use bedup_btrfs::BlkidEntry;
use bedup_btrfs::MountEntry;
use bedup_core::FilesystemId;
use bedup_core::VolumeId;
use bedup_core::VolumeRecord;
use bedup_core::VolumeSummary;

use crate::volumes::DeviceListing;
use crate::volumes::render_volumes;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn summary(id: i64, root_id: u64, last_path: Option<&str>) -> VolumeSummary {
    VolumeSummary {
        record: VolumeRecord {
            id: VolumeId::from_raw(id).unwrap(),
            fs_id: FilesystemId::from_raw(1).unwrap(),
            root_id,
            size_cutoff: 4096,
            last_tracked_generation: 12,
            last_tracked_size_cutoff: Some(4096),
        },
        inode_count: 3,
        last_known_path: last_path.map(PathBuf::from),
    }
}

fn mount(volpath: &str, mountpoint: &str) -> MountEntry {
    MountEntry {
        volpath: PathBuf::from(volpath),
        mountpoint: PathBuf::from(mountpoint),
    }
}

fn device(name: &str, label: Option<&str>, uuid: &str, mounts: Vec<MountEntry>) -> DeviceListing {
    DeviceListing {
        entry: BlkidEntry {
            device: PathBuf::from(name),
            label: label.map(str::to_string),
            uuid: uuid.to_string(),
        },
        mounts,
    }
}

fn probe_table(path: &Path) -> io::Result<Option<u64>> {
    match path.to_str() {
        Some("/") => Ok(Some(256)),
        Some("/home") => Ok(Some(257)),
        Some("/home/user") => Ok(None),
        Some("/secret") => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        _ => Err(io::Error::from(io::ErrorKind::NotFound)),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn mounted_volumes_show_mount_points_and_path() {
    let devices = [device("/dev/sda2", Some("root"), "fs-a", vec![
        mount("/@", "/"),
        mount("/@home", "/home"),
        mount("/@home/user", "/home/user"),
    ])];
    let tracked = BTreeMap::from([("fs-a".to_string(), vec![
        summary(1, 256, None),
        summary(2, 300, Some("/mnt/snap")),
    ])]);

    let lines = render_volumes(&devices, &tracked, probe_table);
    assert_eq!(lines, vec![
        "/dev/sda2",
        "  Label: root UUID: fs-a",
        "    Volume 256 last tracked generation 12 size cutoff 4096",
        "      3 inodes tracked",
        "      Mounted on /",
        "      Path /@",
        "    Volume 300 last tracked generation 12 size cutoff 4096",
        "      3 inodes tracked",
        "      Last mounted on /mnt/snap",
    ]);
}

#[test]
fn untracked_devices_list_only_label_and_uuid() {
    let devices = [device("/dev/sdb1", None, "fs-b", vec![mount("/", "/srv")])];
    let lines = render_volumes(&devices, &BTreeMap::new(), probe_table);
    assert_eq!(lines, vec!["/dev/sdb1", "  UUID: fs-b"]);
}

#[test]
fn permission_denied_stops_probing_the_device() {
    let devices = [device("/dev/sda2", None, "fs-a", vec![
        mount("/@secret", "/secret"),
        mount("/@", "/"),
    ])];
    let tracked = BTreeMap::from([("fs-a".to_string(), vec![summary(1, 256, Some("/"))])]);

    let lines = render_volumes(&devices, &tracked, probe_table);
    assert_eq!(lines.last().map(String::as_str), Some("      Last mounted on /"));
    assert!(!lines.iter().any(|line| line.contains("Mounted on")));
}

#[test]
fn uninspectable_mounts_are_reported_and_skipped() {
    let devices = [device("/dev/sda2", None, "fs-a", vec![
        mount("/@gone", "/srv"),
        mount("/@", "/"),
    ])];
    let tracked = BTreeMap::from([("fs-a".to_string(), vec![summary(1, 256, None)])]);

    let lines = render_volumes(&devices, &tracked, probe_table);
    assert_eq!(lines[2], format!("    Cannot inspect /srv: {}", io::Error::from(io::ErrorKind::NotFound)));
    assert_eq!(&lines[3..], [
        "    Volume 256 last tracked generation 12 size cutoff 4096",
        "      3 inodes tracked",
        "      Mounted on /",
        "      Path /@",
    ]);
}

#[test]
fn tracked_filesystems_without_device_are_unavailable() {
    let tracked = BTreeMap::from([("fs-gone".to_string(), vec![summary(1, 5, None)])]);
    let lines = render_volumes(&[], &tracked, probe_table);
    assert_eq!(lines, vec![
        "<device unavailable>",
        "  UUID: fs-gone",
        "    Volume 5 last tracked generation 12 size cutoff 4096",
        "      3 inodes tracked",
    ]);
}
