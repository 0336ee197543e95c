// crates/bedup-core/src/core/notice.rs
// ============================================================================
// Module: bedup Notices
// Description: Structured progress and outcome notices.
// Purpose: Report scan and dedup progress without binding to an output.
// Dependencies: serde, crate::core::time
// ============================================================================

//! ## Overview
//! Every user-visible progress line or outcome of a scan or dedup pass is a
//! [`Notice`]. Sinks decide whether it becomes a human-readable line or a
//! JSON record; see [`crate::interfaces::NoticeSink`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::time::unix_millis;

// ============================================================================
// SECTION: Notice Types
// ============================================================================

/// Notice payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    /// A volume scan begins.
    ScanStarted {
        /// Volume description (the path it was opened under).
        volume: String,
        /// First generation examined.
        min_generation: u64,
        /// Current generation of the volume.
        top_generation: u64,
        /// Size cutoff in effect.
        size_cutoff: u64,
    },
    /// Nothing changed since the previous scan.
    GenerationUnchanged {
        /// Volume description.
        volume: String,
    },
    /// A tracked inode was created or updated by a scan.
    InodeUpdated {
        /// Path relative to the volume.
        path: PathBuf,
        /// Inode number.
        ino: u64,
        /// Outer generation.
        transid: u64,
        /// Inner generation.
        generation: u64,
        /// Size in bytes.
        size: u64,
    },
    /// Resolving an inode number to a path failed.
    PathLookupFailed {
        /// Inode number.
        ino: u64,
        /// Error description.
        error: String,
    },
    /// A tracked inode no longer exists and its row was dropped.
    StaleInode {
        /// Volume description.
        volume: String,
        /// Inode number.
        ino: u64,
    },
    /// Progress through size groups.
    SizeGroup {
        /// One-based index of the group.
        index: u64,
        /// Total number of groups when the pass started.
        total: u64,
        /// Size shared by the group.
        size: u64,
    },
    /// A group would exceed the open file limit.
    TooManyDuplicates {
        /// Number of candidate files.
        count: u64,
        /// Shared size in bytes.
        size: u64,
        /// Current soft limit.
        soft_limit: u64,
        /// Hard limit.
        hard_limit: u64,
    },
    /// The file is a running executable and cannot be opened for writing.
    FileBusy {
        /// Path relative to the volume.
        path: PathBuf,
    },
    /// Opening the file for writing was refused.
    AccessDenied {
        /// Path relative to the volume.
        path: PathBuf,
    },
    /// The file was moved or unlinked between lookup and open.
    FileMoved {
        /// Path relative to the volume.
        path: PathBuf,
    },
    /// Another process has the file open for writing.
    FileInUse {
        /// Path relative to the volume.
        path: PathBuf,
    },
    /// Files with equal digests compared different.
    FilesDiffer {
        /// Source path.
        source: PathBuf,
        /// Destination path.
        dest: PathBuf,
    },
    /// The destination now shares the source's extents.
    Deduplicated {
        /// Source path.
        source: PathBuf,
        /// Destination path.
        dest: PathBuf,
    },
    /// The files already shared all extents.
    AlreadyDeduplicated {
        /// Source path.
        source: PathBuf,
        /// Destination path.
        dest: PathBuf,
    },
    /// Potential space gains estimated by each pass.
    SpaceGain {
        /// Gain if all same-size files were identical.
        pass1: u64,
        /// Gain if all same-mini-hash files were identical.
        pass2: u64,
        /// Gain if all distinct-layout candidates were identical.
        pass3: u64,
    },
}

/// A timestamped notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Notice payload.
    #[serde(flatten)]
    pub kind: NoticeKind,
}

impl Notice {
    /// Creates a notice stamped with the current time.
    #[must_use]
    pub fn new(kind: NoticeKind) -> Self {
        Self {
            event: "bedup_notice",
            timestamp_ms: unix_millis(),
            kind,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanStarted {
                volume,
                min_generation,
                top_generation,
                size_cutoff,
            } => write!(
                f,
                "Scanning volume {volume} generations from {min_generation} to \
                 {top_generation}, with size cutoff {size_cutoff}"
            ),
            Self::GenerationUnchanged {
                ..
            } => write!(f, "Generation didn't change, skipping scan"),
            Self::InodeUpdated {
                path,
                ino,
                transid,
                generation,
                size,
            } => write!(
                f,
                "Updated {} (ino {ino} outer gen {transid} inner gen {generation} size {size})",
                path.display()
            ),
            Self::PathLookupFailed {
                ino,
                error,
            } => write!(f, "Error at path lookup of inode {ino}: {error}"),
            Self::StaleInode {
                volume,
                ino,
            } => write!(f, "Inode {ino} of {volume} is gone, no longer tracking it"),
            Self::SizeGroup {
                index,
                total,
                size,
            } => write!(f, "Size group {index}/{total} ({size} bytes)"),
            Self::TooManyDuplicates {
                count,
                size,
                soft_limit,
                hard_limit,
            } => write!(
                f,
                "Too many duplicates ({count} at size {size}), would bring us over the open \
                 files limit ({soft_limit}, {hard_limit})."
            ),
            Self::FileBusy {
                path,
            } => write!(f, "File {} is busy, skipping", path.display()),
            Self::AccessDenied {
                path,
            } => write!(f, "Access denied on {}, skipping", path.display()),
            Self::FileMoved {
                path,
            } => write!(f, "File {} may have moved, skipping", path.display()),
            Self::FileInUse {
                path,
            } => write!(f, "File {} is in use, skipping", path.display()),
            Self::FilesDiffer {
                source,
                dest,
            } => write!(f, "Files differ: {} {}", source.display(), dest.display()),
            Self::Deduplicated {
                source,
                dest,
            } => write!(f, "Deduplicated: {} {}", source.display(), dest.display()),
            Self::AlreadyDeduplicated {
                source,
                dest,
            } => write!(
                f,
                "Did not deduplicate (same extents): {} {}",
                source.display(),
                dest.display()
            ),
            Self::SpaceGain {
                pass1,
                pass2,
                pass3,
            } => write!(
                f,
                "Potential space gain: pass 1 {pass1}, pass 2 {pass2}, pass 3 {pass3}"
            ),
        }
    }
}
