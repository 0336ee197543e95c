// crates/bedup-btrfs/src/procfs.rs
// ============================================================================
// Module: Open Writer Detection
// Description: Finds files held open for writing by other processes.
// Purpose: Refuse to clone over files that may still be changing.
// Dependencies: std::fs
// ============================================================================

//! ## Overview
//! Every `/proc/<pid>/fd/<n>` entry of another process is matched by device
//! and inode against the candidate files; matches are writers when the
//! access mode in `/proc/<pid>/fdinfo/<n>` is write-only or read-write.
//! Processes that exit or deny access during the walk are skipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

// ============================================================================
// SECTION: Fdinfo
// ============================================================================

/// Parses the octal `flags:` line of an fdinfo file.
#[must_use]
pub fn parse_fdinfo_flags(text: &str) -> Option<u32> {
    text.lines()
        .find_map(|line| line.strip_prefix("flags:"))
        .and_then(|value| u32::from_str_radix(value.trim(), 8).ok())
}

/// Returns true when open flags grant write access.
#[must_use]
pub const fn is_write_mode(flags: u32) -> bool {
    let mode = flags & 0o3;
    mode == 0o1 || mode == 0o2
}

// ============================================================================
// SECTION: Writers
// ============================================================================

/// Returns the `(dev, ino)` pairs of `targets` that a process other than
/// `own_pid` holds open for writing.
///
/// # Errors
///
/// Returns an I/O error when `proc_root` itself cannot be listed.
pub fn open_writers(
    proc_root: &Path,
    own_pid: u32,
    targets: &BTreeSet<(u64, u64)>,
) -> io::Result<BTreeSet<(u64, u64)>> {
    let mut writers = BTreeSet::new();
    if targets.is_empty() {
        return Ok(writers);
    }
    for entry in fs::read_dir(proc_root)? {
        let Ok(entry) = entry else {
            continue;
        };
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|name| name.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        for (fd, identity) in process_fds(&entry.path(), targets) {
            if writers.contains(&identity) {
                continue;
            }
            let fdinfo = entry.path().join("fdinfo").join(&fd);
            let flags = fs::read_to_string(fdinfo).ok().and_then(|text| parse_fdinfo_flags(&text));
            if flags.is_some_and(is_write_mode) {
                writers.insert(identity);
            }
        }
    }
    Ok(writers)
}

/// Lists the descriptors of one process that refer to one of `targets`.
fn process_fds(
    process: &Path,
    targets: &BTreeSet<(u64, u64)>,
) -> BTreeMap<String, (u64, u64)> {
    let mut found = BTreeMap::new();
    let Ok(entries) = fs::read_dir(process.join("fd")) else {
        return found;
    };
    for entry in entries.flatten() {
        let Ok(meta) = fs::metadata(entry.path()) else {
            continue;
        };
        let identity = (meta.dev(), meta.ino());
        if targets.contains(&identity)
            && let Some(fd) = entry.file_name().to_str()
        {
            found.insert(fd.to_string(), identity);
        }
    }
    found
}

// ============================================================================
// SECTION: Tests
// ============================================================================
