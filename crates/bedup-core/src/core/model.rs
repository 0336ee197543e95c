// crates/bedup-core/src/core/model.rs
// ============================================================================
// Module: bedup Tracking Model
// Description: Filesystem, volume, inode, and dedup event records.
// Purpose: Define the rows persisted by tracking stores.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! The tracking model mirrors the tracking database. Two families of rows
//! exist and are deliberately unlinked:
//! - tracking rows ([`FilesystemRecord`], [`VolumeRecord`], [`InodeRecord`])
//!   are rewritten on every scan and dedup pass;
//! - event rows ([`DedupEvent`], [`DedupEventInode`]) are an append-only log.
//!
//! Inode numbers are reused by btrfs and inode rows get deleted when files
//! disappear, so event rows only reference volumes and filesystems.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EventId;
use crate::core::identifiers::FilesystemId;
use crate::core::identifiers::InodeKey;
use crate::core::identifiers::VolumeId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default size cutoff for newly tracked volumes (8 MiB).
pub const DEFAULT_SIZE_CUTOFF: u64 = 8 * 1024 * 1024;
/// Number of size groups fetched per dedup window.
pub const WINDOW_SIZE: usize = 1024;
/// Read buffer size for hashing and comparisons.
pub const BUFSIZE: usize = 8192;
/// Inode number of a btrfs subvolume root directory.
pub const FIRST_FREE_OBJECTID: u64 = 256;
/// Number of bytes sampled for the mini hash.
pub const MINI_HASH_SAMPLE: usize = 64;
/// Descriptors reserved for stdio, the database, and stray handles.
pub const RESERVED_OPEN_FILES: u64 = 7;

/// File type bits of `st_mode`.
const S_IFMT: u32 = 0o170_000;
/// Regular file type of `st_mode`.
const S_IFREG: u32 = 0o100_000;

/// Returns true when an inode mode describes a regular file.
#[must_use]
pub const fn is_regular_file(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

/// Returns the offset of the mini hash sample for a file of `size` bytes.
#[must_use]
pub const fn mini_hash_offset(size: u64) -> u64 {
    size / 10 * 3 + size % 10 * 3 / 10
}

// ============================================================================
// SECTION: Tracking Records
// ============================================================================

/// A btrfs filesystem, identified by its uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemRecord {
    /// Row identifier.
    pub id: FilesystemId,
    /// Filesystem uuid in canonical hyphenated form.
    pub uuid: String,
}

/// A tracked btrfs volume (subvolume).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Row identifier.
    pub id: VolumeId,
    /// Owning filesystem.
    pub fs_id: FilesystemId,
    /// Subvolume root id (tree id).
    pub root_id: u64,
    /// Files smaller than this are not tracked.
    pub size_cutoff: u64,
    /// Generation reached by the last completed scan (0 when never scanned).
    pub last_tracked_generation: u64,
    /// Size cutoff in effect during the last completed scan.
    pub last_tracked_size_cutoff: Option<u64>,
}

impl VolumeRecord {
    /// Returns the first generation the next scan must examine.
    ///
    /// Lowering the cutoff below the one used by the last scan invalidates the
    /// previous scan, so the volume is rescanned from generation zero.
    #[must_use]
    pub fn scan_min_generation(&self) -> u64 {
        match self.last_tracked_size_cutoff {
            Some(cutoff) if cutoff <= self.size_cutoff => {
                self.last_tracked_generation.saturating_add(1)
            }
            _ => 0,
        }
    }
}

/// A tracked regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    /// Owning volume.
    pub vol_id: VolumeId,
    /// Inode number.
    pub ino: u64,
    /// Size in bytes at the last scan.
    pub size: u64,
    /// Set when the scan saw a change since the last dedup pass.
    pub has_updates: bool,
    /// Partial content hash, when computed.
    pub mini_hash: Option<u64>,
    /// Extent layout hash, when computed.
    pub fiemap_hash: Option<u64>,
}

impl InodeRecord {
    /// Returns the inode key.
    #[must_use]
    pub const fn key(&self) -> InodeKey {
        InodeKey::new(self.vol_id, self.ino)
    }
}

/// A size commonality group: several tracked inodes share one size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeGroup {
    /// Shared size in bytes.
    pub size: u64,
    /// Number of tracked inodes with that size.
    pub inode_count: u64,
}

impl SizeGroup {
    /// Bytes that would be reclaimed if every member were identical.
    #[must_use]
    pub const fn potential_gain(&self) -> u64 {
        potential_gain(self.size, self.inode_count)
    }
}

/// Returns `size * (count - 1)`, saturating.
#[must_use]
pub const fn potential_gain(size: u64, count: u64) -> u64 {
    size.saturating_mul(count.saturating_sub(1))
}

/// Volume listing row with tracking statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSummary {
    /// Volume record.
    pub record: VolumeRecord,
    /// Number of tracked inodes.
    pub inode_count: u64,
    /// Most recently recorded path for the volume.
    pub last_known_path: Option<PathBuf>,
}

// ============================================================================
// SECTION: Event Log Records
// ============================================================================

/// A logged deduplication: one source and the destinations cloned from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEvent {
    /// Row identifier.
    pub id: EventId,
    /// Filesystem the files live on.
    pub fs_id: FilesystemId,
    /// Size of each deduplicated file.
    pub item_size: u64,
    /// Creation time (UTC).
    pub created: Timestamp,
    /// Number of inodes recorded for the event.
    pub inode_count: u64,
}

impl DedupEvent {
    /// Estimated bytes reclaimed by the event.
    #[must_use]
    pub const fn estimated_space_gain(&self) -> u64 {
        potential_gain(self.item_size, self.inode_count)
    }
}

/// One inode taking part in a dedup event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEventInode {
    /// Owning event.
    pub event_id: EventId,
    /// Volume of the inode.
    pub vol_id: VolumeId,
    /// Inode number at the time of the event.
    pub ino: u64,
}

// ============================================================================
// SECTION: Backend Records
// ============================================================================

/// An inode item returned by a btrfs tree search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeItem {
    /// Inode number (key objectid).
    pub ino: u64,
    /// Outer generation: transaction id of the tree leaf holding the item.
    pub transid: u64,
    /// Inner generation stored in the inode item.
    pub generation: u64,
    /// File size in bytes.
    pub size: u64,
    /// File mode bits.
    pub mode: u32,
}

/// A physical extent mapping as reported by FIEMAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Logical offset within the file.
    pub logical: u64,
    /// Physical offset on disk.
    pub physical: u64,
    /// Length in bytes.
    pub length: u64,
    /// FIEMAP extent flags.
    pub flags: u32,
}
