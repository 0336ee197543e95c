// crates/bedup-core/src/runtime/scanner.rs
// ============================================================================
// Module: bedup Volume Scanner
// Description: Incremental scan of a volume for updated regular files.
// Purpose: Keep tracked inode rows in step with the volume's generations.
// Dependencies: thiserror, crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! A scan walks the inode items whose transaction id is newer than the
//! previous scan, tracks every regular file at or above the volume's size
//! cutoff, and marks it updated. Once the walk completes, the volume records
//! the generation and the cutoff it reached.
//!
//! Invariants:
//! - The tracked generation and cutoff only advance after a complete walk; an
//!   interrupted scan is simply redone.
//! - Inodes whose path cannot be resolved are not tracked.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::core::InodeItem;
use crate::core::InodeKey;
use crate::core::Notice;
use crate::core::NoticeKind;
use crate::core::VolumeId;
use crate::core::VolumeRecord;
use crate::core::is_regular_file;
use crate::interfaces::NoticeSink;
use crate::interfaces::StoreError;
use crate::interfaces::TrackingStore;
use crate::interfaces::VolumeBackend;
use crate::runtime::registry::MountedVolume;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Volume registration and scan errors.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Tracking store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Backend failure.
    #[error("{context} {path}: {source}")]
    Io {
        /// Operation that failed.
        context: &'static str,
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The volume is not registered in this run.
    #[error("volume {0} is not registered")]
    UnknownVolume(VolumeId),
}

impl ScanError {
    /// Wraps a backend error with its context.
    pub(crate) fn io(context: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }
}

// ============================================================================
// SECTION: Scan Report
// ============================================================================

/// Outcome of a volume scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// First generation examined.
    pub min_generation: u64,
    /// Generation of the volume when the scan started.
    pub top_generation: u64,
    /// Inodes created or marked updated.
    pub updated: u64,
    /// Inodes dropped because their path could not be resolved.
    pub dropped: u64,
    /// True when the generation had not moved and nothing was walked.
    pub unchanged: bool,
}

// ============================================================================
// SECTION: Scan
// ============================================================================

/// Scans a registered volume for regular files updated since the last scan.
///
/// # Errors
///
/// Returns [`ScanError`] when the tree search or the store fails. Failed path
/// lookups are reported through `sink` and do not abort the scan.
pub fn track_updated_files<S, B>(
    store: &S,
    backend: &B,
    sink: &dyn NoticeSink,
    volume: &mut MountedVolume,
) -> Result<ScanReport, ScanError>
where
    S: TrackingStore + ?Sized,
    B: VolumeBackend + ?Sized,
{
    let top_generation = backend
        .root_generation(volume.handle)
        .map_err(|source| ScanError::io("read generation of", &volume.desc, source))?;
    let min_generation = volume.record.scan_min_generation();
    let desc = volume.desc.display().to_string();
    sink.notify(&Notice::new(NoticeKind::ScanStarted {
        volume: desc.clone(),
        min_generation,
        top_generation,
        size_cutoff: volume.record.size_cutoff,
    }));
    let mut report = ScanReport {
        min_generation,
        top_generation,
        ..ScanReport::default()
    };
    if min_generation > top_generation {
        sink.notify(&Notice::new(NoticeKind::GenerationUnchanged {
            volume: desc,
        }));
        report.unchanged = true;
        return Ok(report);
    }

    let items = backend
        .inode_items(volume.handle, min_generation)
        .map_err(|source| ScanError::io("search tree of", &volume.desc, source))?;
    for item in items {
        let item = item.map_err(|source| ScanError::io("search tree of", &volume.desc, source))?;
        if !should_track(&volume.record, min_generation, &item) {
            continue;
        }
        let key = InodeKey::new(volume.record.id, item.ino);
        match backend.lookup_ino_path(volume.handle, item.ino) {
            Ok(path) => {
                store.upsert_inode(key.vol_id, key.ino, item.size)?;
                report.updated += 1;
                sink.notify(&Notice::new(NoticeKind::InodeUpdated {
                    path,
                    ino: item.ino,
                    transid: item.transid,
                    generation: item.generation,
                    size: item.size,
                }));
            }
            Err(err) => {
                sink.notify(&Notice::new(NoticeKind::PathLookupFailed {
                    ino: item.ino,
                    error: err.to_string(),
                }));
                store.delete_inode(key)?;
                report.dropped += 1;
            }
        }
    }

    volume.record.last_tracked_generation = top_generation;
    volume.record.last_tracked_size_cutoff = Some(volume.record.size_cutoff);
    store.save_volume(&volume.record)?;
    Ok(report)
}

/// Applies the size, generation, and file type filters to an inode item.
fn should_track(volume: &VolumeRecord, min_generation: u64, item: &InodeItem) -> bool {
    if item.size < volume.size_cutoff {
        return false;
    }
    let seen_by_last_scan = match volume.last_tracked_size_cutoff {
        Some(last_cutoff) if last_cutoff > 0 && item.size >= last_cutoff => {
            item.generation <= volume.last_tracked_generation
        }
        _ => item.generation < min_generation,
    };
    !seen_by_last_scan && is_regular_file(item.mode)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use super::should_track;
    use crate::core::FilesystemId;
    use crate::core::InodeItem;
    use crate::core::VolumeId;
    use crate::core::VolumeRecord;

    const REGULAR: u32 = 0o100_644;

    fn volume(cutoff: u64, last_generation: u64, last_cutoff: Option<u64>) -> VolumeRecord {
        VolumeRecord {
            id: VolumeId::from_raw(1).unwrap(),
            fs_id: FilesystemId::from_raw(1).unwrap(),
            root_id: 5,
            size_cutoff: cutoff,
            last_tracked_generation: last_generation,
            last_tracked_size_cutoff: last_cutoff,
        }
    }

    fn item(size: u64, generation: u64, mode: u32) -> InodeItem {
        InodeItem {
            ino: 300,
            transid: generation,
            generation,
            size,
            mode,
        }
    }

    #[test]
    fn small_and_irregular_files_are_skipped() {
        let vol = volume(100, 0, None);
        assert!(!should_track(&vol, 0, &item(99, 10, REGULAR)));
        assert!(!should_track(&vol, 0, &item(100, 10, 0o040_755)));
        assert!(should_track(&vol, 0, &item(100, 10, REGULAR)));
    }

    #[test]
    fn files_seen_by_previous_scan_are_skipped() {
        let vol = volume(100, 20, Some(100));
        let min_generation = vol.scan_min_generation();
        assert_eq!(min_generation, 21);
        assert!(!should_track(&vol, min_generation, &item(150, 20, REGULAR)));
        assert!(should_track(&vol, min_generation, &item(150, 21, REGULAR)));
    }

    #[test]
    fn files_below_previous_cutoff_use_min_generation() {
        let vol = volume(50, 20, Some(100));
        let min_generation = vol.scan_min_generation();
        assert_eq!(min_generation, 0);
        assert!(should_track(&vol, min_generation, &item(60, 3, REGULAR)));
        assert!(!should_track(&vol, min_generation, &item(150, 20, REGULAR)));
    }
}
