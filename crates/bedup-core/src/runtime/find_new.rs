// crates/bedup-core/src/runtime/find_new.rs
// ============================================================================
// Module: bedup Find New
// Description: Lists regular files of a volume changed since a generation.
// Purpose: Read-only view of the tree search, without touching the store.
// Dependencies: crate::{core, interfaces, runtime::scanner}
// ============================================================================

//! ## Overview
//! `find_new` walks the same inode items as a scan but only reports paths.
//! Items are filtered by their inner generation; files whose path can no
//! longer be resolved are left out.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::path::PathBuf;

use crate::core::is_regular_file;
use crate::interfaces::VolumeBackend;
use crate::runtime::registry::MountedVolume;
use crate::runtime::scanner::ScanError;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Files found by [`find_new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindNewReport {
    /// Paths relative to the volume, in inode order.
    pub paths: Vec<PathBuf>,
    /// Generation of the volume when the search started.
    pub generation: u64,
}

// ============================================================================
// SECTION: Search
// ============================================================================

/// Lists regular files whose inode generation is at least `min_generation`.
///
/// # Errors
///
/// Returns [`ScanError::Io`] when the generation or the tree search cannot be
/// read, or when a path lookup fails for a reason other than the inode being
/// gone.
pub fn find_new<B>(
    backend: &B,
    volume: &MountedVolume,
    min_generation: u64,
) -> Result<FindNewReport, ScanError>
where
    B: VolumeBackend + ?Sized,
{
    let generation = backend
        .root_generation(volume.handle)
        .map_err(|source| ScanError::io("read generation of", &volume.desc, source))?;
    let items = backend
        .inode_items(volume.handle, min_generation)
        .map_err(|source| ScanError::io("search tree of", &volume.desc, source))?;
    let mut paths = Vec::new();
    for item in items {
        let item = item.map_err(|source| ScanError::io("search tree of", &volume.desc, source))?;
        if item.generation < min_generation || !is_regular_file(item.mode) {
            continue;
        }
        match backend.lookup_ino_path(volume.handle, item.ino) {
            Ok(path) => paths.push(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ScanError::io("look up inode path in", &volume.desc, source));
            }
        }
    }
    Ok(FindNewReport {
        paths,
        generation,
    })
}
