// crates/bedup-core/src/core/identifiers.rs
// ============================================================================
// Module: bedup Identifiers
// Description: Row identifiers for filesystems, volumes, and dedup events.
// Purpose: Keep database row ids from being mixed up across tables.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Tracking rows are keyed by positive integers assigned by the store. The
//! wrappers below are opaque: they are created by stores via `from_raw` and
//! only read back with `get`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Filesystem row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilesystemId(i64);

impl FilesystemId {
    /// Wraps a raw row id; returns `None` for non-positive values.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 { Some(Self(raw)) } else { None }
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FilesystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Volume (subvolume) row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(i64);

impl VolumeId {
    /// Wraps a raw row id; returns `None` for non-positive values.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 { Some(Self(raw)) } else { None }
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dedup event row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Wraps a raw row id; returns `None` for non-positive values.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 { Some(Self(raw)) } else { None }
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tracked inode key: an inode number is only unique within its volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeKey {
    /// Owning volume.
    pub vol_id: VolumeId,
    /// Inode number within the volume.
    pub ino: u64,
}

impl InodeKey {
    /// Creates a new inode key.
    #[must_use]
    pub const fn new(vol_id: VolumeId, ino: u64) -> Self {
        Self {
            vol_id,
            ino,
        }
    }
}

impl fmt::Display for InodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vol_id, self.ino)
    }
}
