// crates/bedup-core/src/runtime/registry.rs
// ============================================================================
// Module: bedup Volume Registry
// Description: Volumes opened during one bedup invocation.
// Purpose: Map tracking rows to open backend handles.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! A volume named on the command line is opened once, identified by its
//! filesystem uuid and subvolume root id, and looked up (or created) in the
//! tracking store. If the same volume is named twice, the first path and
//! handle are kept. The path is only a description: mountpoints move.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::core::FilesystemId;
use crate::core::VolumeId;
use crate::core::VolumeRecord;
use crate::interfaces::TrackingStore;
use crate::interfaces::VolumeBackend;
use crate::interfaces::VolumeHandle;
use crate::runtime::scanner::ScanError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A tracked volume with an open backend handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedVolume {
    /// Tracking row.
    pub record: VolumeRecord,
    /// Backend handle.
    pub handle: VolumeHandle,
    /// Device number of files on this volume.
    pub st_dev: u64,
    /// Path the volume was first opened under in this run.
    pub desc: PathBuf,
}

impl MountedVolume {
    /// Joins a volume-relative path onto the volume description.
    #[must_use]
    pub fn display_path(&self, relative: &Path) -> PathBuf {
        self.desc.join(relative)
    }
}

/// Volumes registered during this run, keyed by volume id.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    /// Registered volumes.
    volumes: BTreeMap<VolumeId, MountedVolume>,
    /// Registration order, for stable iteration.
    order: Vec<VolumeId>,
}

impl VolumeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a registered volume.
    #[must_use]
    pub fn get(&self, id: VolumeId) -> Option<&MountedVolume> {
        self.volumes.get(&id)
    }

    /// Returns a registered volume mutably.
    pub fn get_mut(&mut self, id: VolumeId) -> Option<&mut MountedVolume> {
        self.volumes.get_mut(&id)
    }

    /// Returns volume ids in registration order.
    #[must_use]
    pub fn ids(&self) -> &[VolumeId] {
        &self.order
    }

    /// Returns the number of registered volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Groups volume ids by filesystem, preserving registration order.
    #[must_use]
    pub fn by_filesystem(&self) -> BTreeMap<FilesystemId, Vec<VolumeId>> {
        let mut grouped: BTreeMap<FilesystemId, Vec<VolumeId>> = BTreeMap::new();
        for id in &self.order {
            if let Some(volume) = self.volumes.get(id) {
                grouped.entry(volume.record.fs_id).or_default().push(*id);
            }
        }
        grouped
    }

    /// Closes every backend handle and empties the registry.
    pub fn close_all<B: VolumeBackend + ?Sized>(&mut self, backend: &mut B) {
        for volume in self.volumes.values() {
            backend.close_volume(volume.handle);
        }
        self.volumes.clear();
        self.order.clear();
    }

    /// Inserts a volume unless its id is already registered; returns false
    /// when the volume was already present.
    fn insert(&mut self, volume: MountedVolume) -> bool {
        let id = volume.record.id;
        if self.volumes.contains_key(&id) {
            return false;
        }
        self.order.push(id);
        self.volumes.insert(id, volume);
        true
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Opens a volume, records it in the tracking store, and registers it.
///
/// `size_cutoff` overrides the stored cutoff when given; new volumes start
/// with `default_size_cutoff`.
///
/// # Errors
///
/// Returns [`ScanError`] when the volume cannot be opened or the store fails.
pub fn register_volume<S, B>(
    store: &S,
    backend: &mut B,
    registry: &mut VolumeRegistry,
    path: &Path,
    size_cutoff: Option<u64>,
    default_size_cutoff: u64,
) -> Result<VolumeId, ScanError>
where
    S: TrackingStore + ?Sized,
    B: VolumeBackend + ?Sized,
{
    let volpath = normalize_path(path);
    let probe = backend
        .open_volume(&volpath)
        .map_err(|source| ScanError::io("open volume", &volpath, source))?;
    let registered = record_probe(store, &volpath, &probe, size_cutoff, default_size_cutoff);
    let mut record = match registered {
        Ok(record) => record,
        Err(err) => {
            backend.close_volume(probe.handle);
            return Err(err);
        }
    };
    let id = record.id;
    if let Some(existing) = registry.get_mut(id) {
        existing.record.size_cutoff = record.size_cutoff;
        backend.close_volume(probe.handle);
        return Ok(id);
    }
    if record.size_cutoff == 0 {
        record.size_cutoff = default_size_cutoff;
    }
    registry.insert(MountedVolume {
        record,
        handle: probe.handle,
        st_dev: probe.st_dev,
        desc: volpath,
    });
    Ok(id)
}

/// Stores the filesystem, volume, and path history rows for a probe.
fn record_probe<S: TrackingStore + ?Sized>(
    store: &S,
    volpath: &Path,
    probe: &crate::interfaces::VolumeProbe,
    size_cutoff: Option<u64>,
    default_size_cutoff: u64,
) -> Result<VolumeRecord, ScanError> {
    let (filesystem, _) = store.get_or_create_filesystem(&probe.fs_uuid)?;
    let (mut volume, _) =
        store.get_or_create_volume(filesystem.id, probe.root_id, default_size_cutoff)?;
    if let Some(cutoff) = size_cutoff
        && cutoff != volume.size_cutoff
    {
        volume.size_cutoff = cutoff;
        store.save_volume(&volume)?;
    }
    store.record_volume_path(volume.id, volpath)?;
    Ok(volume)
}

/// Forgets every tracked inode of a registered volume.
///
/// # Errors
///
/// Returns [`ScanError`] when the volume is unknown or the store fails.
pub fn forget_volume<S: TrackingStore + ?Sized>(
    store: &S,
    registry: &mut VolumeRegistry,
    id: VolumeId,
) -> Result<(), ScanError> {
    let volume = registry.get_mut(id).ok_or(ScanError::UnknownVolume(id))?;
    store.forget_volume(id)?;
    volume.record.last_tracked_generation = 0;
    volume.record.last_tracked_size_cutoff = None;
    Ok(())
}

/// Normalizes a path lexically: drops `.` and empty components and folds
/// `..` into its parent. Symlinks are not resolved.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    let mut depth = 0_usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

// ============================================================================
// SECTION: Tests
// ============================================================================
