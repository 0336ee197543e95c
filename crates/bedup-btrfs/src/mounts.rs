// crates/bedup-btrfs/src/mounts.rs
// ============================================================================
// Module: btrfs Mounts and Devices
// Description: Parsers for /proc/self/mountinfo and blkid output.
// Purpose: Map btrfs devices to labels, uuids, and mounted subvolumes.
// Dependencies: std::{fs, process}
// ============================================================================

//! ## Overview
//! Volume listings combine three sources: `blkid` names every btrfs device
//! with its label and uuid, `/proc/self/mountinfo` lists where each device is
//! mounted and which subvolume path each mount shows, and the tracking
//! database holds what was scanned. The parsers here are pure; the readers
//! wrap them around the live system.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

// ============================================================================
// SECTION: Mountinfo
// ============================================================================

/// One btrfs mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Path of the mounted subvolume within the filesystem.
    pub volpath: PathBuf,
    /// Mount point.
    pub mountpoint: PathBuf,
}

/// Decodes the octal escapes mountinfo uses for spaces, tabs, and
/// backslashes.
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] == b'\\'
            && let Some(digits) = field.get(pos + 1..pos + 4)
            && let Ok(value) = u8::from_str_radix(digits, 8)
        {
            out.push(value);
            pos += 4;
            continue;
        }
        out.push(bytes[pos]);
        pos += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Groups the btrfs mounts of a mountinfo table by source device, as written
/// in the table.
#[must_use]
pub fn parse_mountinfo(text: &str) -> BTreeMap<PathBuf, Vec<MountEntry>> {
    let mut mounts: BTreeMap<PathBuf, Vec<MountEntry>> = BTreeMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(separator) = fields.iter().position(|field| *field == "-") else {
            continue;
        };
        if separator < 5 || fields.get(separator + 1) != Some(&"btrfs") {
            continue;
        }
        let Some(device) = fields.get(separator + 2) else {
            continue;
        };
        mounts.entry(PathBuf::from(unescape_mountinfo(device))).or_default().push(MountEntry {
            volpath: PathBuf::from(unescape_mountinfo(fields[3])),
            mountpoint: PathBuf::from(unescape_mountinfo(fields[4])),
        });
    }
    mounts
}

/// Reads the btrfs mounts of this process, keyed by canonical device path.
///
/// # Errors
///
/// Returns an I/O error when the mountinfo table cannot be read.
pub fn read_mountinfo(path: &Path) -> io::Result<BTreeMap<PathBuf, Vec<MountEntry>>> {
    let text = fs::read_to_string(path)?;
    let mut canonical: BTreeMap<PathBuf, Vec<MountEntry>> = BTreeMap::new();
    for (device, entries) in parse_mountinfo(&text) {
        let device = fs::canonicalize(&device).unwrap_or(device);
        canonical.entry(device).or_default().extend(entries);
    }
    Ok(canonical)
}

// ============================================================================
// SECTION: blkid
// ============================================================================

/// One btrfs device reported by blkid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkidEntry {
    /// Device path.
    pub device: PathBuf,
    /// Filesystem label, if any.
    pub label: Option<String>,
    /// Filesystem uuid.
    pub uuid: String,
}

/// Parses `DEV: [LABEL="..." ]UUID="..."` lines; other lines are skipped.
#[must_use]
pub fn parse_blkid(text: &str) -> Vec<BlkidEntry> {
    text.lines().filter_map(parse_blkid_line).collect()
}

/// Parses one blkid line.
fn parse_blkid_line(line: &str) -> Option<BlkidEntry> {
    let (device, rest) = line.split_once(": ")?;
    if !device.starts_with("/dev/") {
        return None;
    }
    let mut rest = rest.trim();
    let mut label = None;
    if let Some(after) = rest.strip_prefix("LABEL=\"") {
        let (value, tail) = after.split_once('"')?;
        label = Some(value.to_string());
        rest = tail.trim_start();
    }
    let after = rest.strip_prefix("UUID=\"")?;
    let (uuid, tail) = after.split_once('"')?;
    if !tail.trim().is_empty() {
        return None;
    }
    Some(BlkidEntry {
        device: PathBuf::from(device),
        label,
        uuid: uuid.to_string(),
    })
}

/// Runs `blkid` and lists every btrfs device it knows.
///
/// # Errors
///
/// Returns an I/O error when blkid cannot run or fails. Exit status 2 means
/// no device matched and yields an empty list.
pub fn list_btrfs_devices() -> io::Result<Vec<BlkidEntry>> {
    let output = Command::new("blkid")
        .args(["-s", "LABEL", "-s", "UUID", "-t", "TYPE=btrfs"])
        .output()?;
    match output.status.code() {
        Some(0) => Ok(parse_blkid(&String::from_utf8_lossy(&output.stdout))),
        Some(2) => Ok(Vec::new()),
        _ => Err(io::Error::other(format!(
            "blkid failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::BlkidEntry;
    use super::MountEntry;
    use super::parse_blkid;
    use super::parse_mountinfo;

    const MOUNTINFO: &str = "\
22 1 0:21 / / rw,relatime shared:1 - btrfs /dev/sda2 rw,ssd,subvolid=256,subvol=/@
23 22 0:22 / /proc rw,nosuid shared:12 - proc proc rw
40 22 0:21 /@home /home rw,relatime shared:30 - btrfs /dev/sda2 rw,subvolid=257,subvol=/@home
41 22 0:35 / /mnt/back\\040up rw,relatime shared:31 - btrfs /dev/sdb1 rw,subvolid=5,subvol=/
42 22 8:3 / /boot rw,relatime shared:32 master:4 - ext4 /dev/sda1 rw
";

    #[test]
    fn mountinfo_keeps_btrfs_mounts_by_device() {
        let mounts = parse_mountinfo(MOUNTINFO);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[&PathBuf::from("/dev/sda2")], vec![
            MountEntry {
                volpath: PathBuf::from("/"),
                mountpoint: PathBuf::from("/"),
            },
            MountEntry {
                volpath: PathBuf::from("/@home"),
                mountpoint: PathBuf::from("/home"),
            },
        ]);
        assert_eq!(mounts[&PathBuf::from("/dev/sdb1")][0].mountpoint, PathBuf::from("/mnt/back up"));
    }

    #[test]
    fn mountinfo_ignores_short_and_foreign_lines() {
        assert!(parse_mountinfo("garbage\n1 2 - btrfs\n").is_empty());
    }

    #[test]
    fn blkid_lines_with_and_without_label() {
        let text = "/dev/sda2: LABEL=\"root fs\" UUID=\"0e6fb1c4-1d4e-4bb0-a7c5-2c2b4a9e6c11\"\n\
                    /dev/sdb1: UUID=\"5b2f1c8e-77aa-4e0a-9d1f-0c9b2d3e4f50\"\n\
                    /dev/sdc1: TYPE=\"ext4\"\n\
                    not a device line\n";
        assert_eq!(parse_blkid(text), vec![
            BlkidEntry {
                device: PathBuf::from("/dev/sda2"),
                label: Some("root fs".to_string()),
                uuid: "0e6fb1c4-1d4e-4bb0-a7c5-2c2b4a9e6c11".to_string(),
            },
            BlkidEntry {
                device: PathBuf::from("/dev/sdb1"),
                label: None,
                uuid: "5b2f1c8e-77aa-4e0a-9d1f-0c9b2d3e4f50".to_string(),
            },
        ]);
    }
}
