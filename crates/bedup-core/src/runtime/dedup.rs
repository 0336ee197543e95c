// crates/bedup-core/src/runtime/dedup.rs
// ============================================================================
// Module: bedup Dedup Pass
// Description: Deduplication of tracked inodes across volumes of one filesystem.
// Purpose: Find identical files cheaply and clone them onto a shared source.
// Dependencies: thiserror, crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! A dedup pass visits size groups, largest first, in windows of
//! [`DedupOptions::window_size`] groups. Each group goes through three
//! filters:
//! 1. a mini hash over a small sample splits the size group;
//! 2. an extent layout hash keeps one file per layout, since files that
//!    already share every extent have nothing to gain;
//! 3. the remaining candidates are opened read-write, frozen, hashed in full,
//!    compared byte for byte, and cloned onto the first file of each digest
//!    bucket.
//!
//! Invariants:
//! - Files are only cloned after a byte comparison under the immutable flag.
//! - Update marks are cleared per window; inodes skipped for transient
//!   reasons (busy, in use, moved) are marked again so the next pass retries.
//! - Commits run with relaxed durability during the pass and full durability
//!   afterwards, even when the pass fails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::EventId;
use crate::core::FilesystemId;
use crate::core::InodeKey;
use crate::core::InodeRecord;
use crate::core::Notice;
use crate::core::NoticeKind;
use crate::core::RESERVED_OPEN_FILES;
use crate::core::SizeGroup;
use crate::core::Timestamp;
use crate::core::VolumeId;
use crate::core::WINDOW_SIZE;
use crate::core::extent_map_hash;
use crate::core::potential_gain;
use crate::interfaces::CloneOutcome;
use crate::interfaces::DedupFile;
use crate::interfaces::Durability;
use crate::interfaces::NoticeSink;
use crate::interfaces::StoreError;
use crate::interfaces::TrackingStore;
use crate::interfaces::VolumeBackend;
use crate::runtime::content::file_mini_hash;
use crate::runtime::content::files_equal;
use crate::runtime::content::hash_file;
use crate::runtime::freeze::FrozenFiles;
use crate::runtime::registry::MountedVolume;
use crate::runtime::registry::VolumeRegistry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Deduplication errors.
#[derive(Debug, Error)]
pub enum DedupError {
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
    /// The volumes of one pass live on different filesystems.
    #[error("volumes of one dedup pass must share a filesystem")]
    MixedFilesystems,
    /// A volume id is not registered in this run.
    #[error("volume {0} is not registered")]
    UnknownVolume(VolumeId),
    /// Files with equal digests compared different.
    #[error("files have equal digests but different contents: {source_path} {dest_path}")]
    ContentMismatch {
        /// Clone source path.
        source_path: String,
        /// Destination path.
        dest_path: String,
    },
    /// Files passed for explicit dedup differ in size.
    #[error("file sizes differ: {path}")]
    SizeMismatch {
        /// First file with a different size.
        path: String,
    },
    /// A file passed for explicit dedup is open for writing elsewhere.
    #[error("file is in use: {path}")]
    InUse {
        /// File path.
        path: String,
    },
    /// Explicit dedup needs at least two files.
    #[error("at least two files are needed, got {0}")]
    TooFewFiles(usize),
}

impl DedupError {
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
// SECTION: Options and Report
// ============================================================================

/// Tunables of a dedup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOptions {
    /// Size groups fetched per window.
    pub window_size: usize,
    /// Defragment each clone source before cloning.
    pub defragment_source: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            defragment_source: false,
        }
    }
}

/// Outcome of a dedup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    /// Size groups visited.
    pub size_groups: u64,
    /// Potential gain if every same-size file were identical.
    pub pass1_gain: u64,
    /// Potential gain if every same-mini-hash file were identical.
    pub pass2_gain: u64,
    /// Potential gain if every distinct-layout candidate were identical.
    pub pass3_gain: u64,
    /// Destinations cloned.
    pub cloned: u64,
    /// Destinations that already shared the source's extents.
    pub already_shared: u64,
    /// Inodes dropped from tracking because they are gone.
    pub dropped: u64,
    /// Inodes left marked updated for the next pass.
    pub skipped: Vec<InodeKey>,
    /// Events appended to the event log.
    pub events: Vec<EventId>,
}

// ============================================================================
// SECTION: Dedup Pass
// ============================================================================

/// Deduplicates the tracked inodes of registered volumes of one filesystem.
///
/// # Errors
///
/// Returns [`DedupError`] when the volumes span filesystems, the store or
/// backend fails, or files with equal digests compare different.
pub fn dedup_tracked<S, B>(
    store: &S,
    backend: &B,
    sink: &dyn NoticeSink,
    registry: &VolumeRegistry,
    vol_ids: &[VolumeId],
    options: DedupOptions,
) -> Result<DedupReport, DedupError>
where
    S: TrackingStore + ?Sized,
    B: VolumeBackend + ?Sized,
{
    let Some(fs_id) = shared_filesystem(registry, vol_ids)? else {
        return Ok(DedupReport::default());
    };
    let (soft_limit, hard_limit) =
        backend.open_file_limit().map_err(|source| DedupError::io("read limits for", Path::new("/"), source))?;
    let mut pass = DedupPass {
        store,
        backend,
        sink,
        registry,
        vol_ids,
        options,
        fs_id,
        soft_limit,
        hard_limit,
        reserved: RESERVED_OPEN_FILES + vol_ids.len() as u64,
        skipped: Vec::new(),
        report: DedupReport::default(),
    };

    store.set_durability(Durability::Relaxed)?;
    let outcome = pass.run();
    let restored = store.set_durability(Durability::Full);
    outcome?;
    restored?;

    sink.notify(&Notice::new(NoticeKind::SpaceGain {
        pass1: pass.report.pass1_gain,
        pass2: pass.report.pass2_gain,
        pass3: pass.report.pass3_gain,
    }));
    Ok(pass.report)
}

/// Returns the filesystem shared by every volume, or `None` for no volumes.
fn shared_filesystem(
    registry: &VolumeRegistry,
    vol_ids: &[VolumeId],
) -> Result<Option<FilesystemId>, DedupError> {
    let mut shared = None;
    for id in vol_ids {
        let volume = registry.get(*id).ok_or(DedupError::UnknownVolume(*id))?;
        match shared {
            None => shared = Some(volume.record.fs_id),
            Some(fs_id) if fs_id != volume.record.fs_id => {
                return Err(DedupError::MixedFilesystems);
            }
            Some(_) => {}
        }
    }
    Ok(shared)
}

/// State of one dedup pass.
struct DedupPass<'a, S: ?Sized, B: ?Sized> {
    /// Tracking store.
    store: &'a S,
    /// Volume backend.
    backend: &'a B,
    /// Notice receiver.
    sink: &'a dyn NoticeSink,
    /// Registered volumes.
    registry: &'a VolumeRegistry,
    /// Volumes taking part.
    vol_ids: &'a [VolumeId],
    /// Tunables.
    options: DedupOptions,
    /// Filesystem of the volumes.
    fs_id: FilesystemId,
    /// Current soft open file limit.
    soft_limit: u64,
    /// Hard open file limit.
    hard_limit: u64,
    /// Descriptors kept free for the process itself.
    reserved: u64,
    /// Inodes to mark updated again at the end of the window.
    skipped: Vec<InodeKey>,
    /// Accumulated report.
    report: DedupReport,
}

impl<'a, S, B> DedupPass<'a, S, B>
where
    S: TrackingStore + ?Sized,
    B: VolumeBackend + ?Sized,
{
    /// Walks the size groups window by window.
    fn run(&mut self) -> Result<(), DedupError> {
        let total = self.store.count_size_groups(self.vol_ids)?;
        if total == 0 {
            return Ok(());
        }
        let Some(mut window_start) = self.store.max_inode_size(self.vol_ids)? else {
            return Ok(());
        };
        let window_size = self.options.window_size.max(1);
        loop {
            let groups = self.store.size_groups(self.vol_ids, window_start, window_size)?;
            let Some(last) = groups.last() else {
                self.store.clear_updates(self.vol_ids, window_start, 0)?;
                return Ok(());
            };
            let window_end = last.size;
            for group in &groups {
                self.report.size_groups += 1;
                self.sink.notify(&Notice::new(NoticeKind::SizeGroup {
                    index: self.report.size_groups,
                    total,
                    size: group.size,
                }));
                self.process_size_group(group)?;
            }
            self.store.clear_updates(self.vol_ids, window_start, window_end)?;
            for key in std::mem::take(&mut self.skipped) {
                self.store.mark_updated(key)?;
                self.report.skipped.push(key);
            }
            if window_end == 0 {
                return Ok(());
            }
            window_start = window_end - 1;
        }
    }

    /// Returns the registered volume of an inode.
    fn volume(&self, inode: &InodeRecord) -> Result<&'a MountedVolume, DedupError> {
        self.registry.get(inode.vol_id).ok_or(DedupError::UnknownVolume(inode.vol_id))
    }

    /// Resolves an inode's path, dropping it from tracking when it is gone.
    fn resolve_path(&mut self, inode: &InodeRecord) -> Result<Option<PathBuf>, DedupError> {
        let volume = self.volume(inode)?;
        match self.backend.lookup_ino_path(volume.handle, inode.ino) {
            Ok(path) => Ok(Some(path)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.sink.notify(&Notice::new(NoticeKind::StaleInode {
                    volume: volume.desc.display().to_string(),
                    ino: inode.ino,
                }));
                self.store.delete_inode(inode.key())?;
                self.report.dropped += 1;
                Ok(None)
            }
            Err(err) => Err(DedupError::io("look up inode path in", &volume.desc, err)),
        }
    }

    /// Opens a tracked inode read-only; `None` when it moved away.
    fn open_tracked(&mut self, inode: &InodeRecord) -> Result<Option<Box<dyn DedupFile>>, DedupError> {
        let Some(path) = self.resolve_path(inode)? else {
            return Ok(None);
        };
        let volume = self.volume(inode)?;
        match self.backend.open_read(volume.handle, &path) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.skipped.push(inode.key());
                Ok(None)
            }
            Err(err) => Err(DedupError::io("open", &volume.display_path(&path), err)),
        }
    }

    /// Pass 1: splits a size group by mini hash.
    fn process_size_group(&mut self, group: &SizeGroup) -> Result<(), DedupError> {
        self.report.pass1_gain += group.potential_gain();
        let inodes = self.store.inodes_of_size(self.vol_ids, group.size)?;
        let mut by_mini_hash: BTreeMap<u64, Vec<InodeRecord>> = BTreeMap::new();
        for mut inode in inodes {
            let Some(file) = self.open_tracked(&inode)? else {
                continue;
            };
            let hash = file_mini_hash(file.as_ref(), inode.size)
                .map_err(|source| DedupError::io("read", file.path(), source))?;
            inode.mini_hash = Some(hash);
            self.store.save_inode_hashes(&inode)?;
            by_mini_hash.entry(hash).or_default().push(inode);
        }
        for members in by_mini_hash.into_values() {
            if members.len() > 1 {
                self.process_mini_hash_group(group.size, members)?;
            }
        }
        Ok(())
    }

    /// Pass 2: keeps the first inode of each distinct extent layout, in
    /// tracking order.
    fn process_mini_hash_group(&mut self, size: u64, members: Vec<InodeRecord>) -> Result<(), DedupError> {
        self.report.pass2_gain += potential_gain(size, members.len() as u64);
        let mut layouts = BTreeSet::new();
        let mut candidates = Vec::with_capacity(members.len());
        for mut inode in members {
            let Some(file) = self.open_tracked(&inode)? else {
                continue;
            };
            let extents = file
                .extents()
                .map_err(|source| DedupError::io("map extents of", file.path(), source))?;
            let hash = extent_map_hash(&extents);
            inode.fiemap_hash = Some(hash);
            self.store.save_inode_hashes(&inode)?;
            if layouts.insert(hash) {
                candidates.push(inode);
            }
        }
        if candidates.len() > 1 {
            self.verify_and_clone(size, candidates)?;
        }
        Ok(())
    }

    /// Ensures the open file limit allows `count` candidates, raising the soft
    /// limit when possible.
    fn reserve_descriptors(&mut self, count: u64, size: u64) -> Result<bool, DedupError> {
        let required = count.saturating_mul(2).saturating_add(self.reserved);
        if required <= self.soft_limit {
            return Ok(true);
        }
        if required > self.hard_limit {
            self.sink.notify(&Notice::new(NoticeKind::TooManyDuplicates {
                count,
                size,
                soft_limit: self.soft_limit,
                hard_limit: self.hard_limit,
            }));
            return Ok(false);
        }
        self.backend
            .set_open_file_soft_limit(required)
            .map_err(|source| DedupError::io("raise open file limit for", Path::new("/"), source))?;
        self.soft_limit = required;
        Ok(true)
    }

    /// Pass 3: opens, freezes, verifies, and clones the candidates.
    fn verify_and_clone(&mut self, size: u64, candidates: Vec<InodeRecord>) -> Result<(), DedupError> {
        let count = candidates.len() as u64;
        self.report.pass3_gain += potential_gain(size, count);
        if !self.reserve_descriptors(count, size)? {
            for inode in &candidates {
                if inode.has_updates {
                    self.skipped.push(inode.key());
                }
            }
            return Ok(());
        }

        let mut files: Vec<Box<dyn DedupFile>> = Vec::with_capacity(candidates.len());
        let mut members: Vec<(InodeRecord, PathBuf)> = Vec::with_capacity(candidates.len());
        for inode in candidates {
            let Some(path) = self.resolve_path(&inode)? else {
                continue;
            };
            let volume = self.volume(&inode)?;
            let shown = volume.display_path(&path);
            match self.backend.open_rw(volume.handle, &path) {
                Ok(file) => {
                    files.push(file);
                    members.push((inode, shown));
                }
                Err(err) => {
                    let kind = match err.kind() {
                        io::ErrorKind::ExecutableFileBusy => NoticeKind::FileBusy {
                            path: shown,
                        },
                        io::ErrorKind::PermissionDenied => NoticeKind::AccessDenied {
                            path: shown,
                        },
                        io::ErrorKind::NotFound => NoticeKind::FileMoved {
                            path: shown,
                        },
                        _ => return Err(DedupError::io("open", &shown, err)),
                    };
                    self.sink.notify(&Notice::new(kind));
                    self.skipped.push(inode.key());
                }
            }
        }
        if files.len() < 2 {
            return Ok(());
        }

        let frozen = FrozenFiles::freeze(files)
            .map_err(|source| DedupError::io("freeze", Path::new(&members_desc(&members)), source))?;
        let buckets = self.bucket_by_digest(size, &frozen, &members)?;
        for bucket in buckets.into_values() {
            if bucket.len() > 1 {
                self.clone_bucket(size, &frozen, &members, &bucket)?;
            }
        }
        frozen
            .thaw()
            .map_err(|source| DedupError::io("unfreeze", Path::new(&members_desc(&members)), source))?;
        Ok(())
    }

    /// Hashes frozen files and groups their indices by digest.
    fn bucket_by_digest(
        &mut self,
        size: u64,
        frozen: &FrozenFiles,
        members: &[(InodeRecord, PathBuf)],
    ) -> Result<BTreeMap<String, Vec<usize>>, DedupError> {
        let writers = self
            .backend
            .writers_among(frozen.files())
            .map_err(|source| DedupError::io("list writers of", Path::new("/proc"), source))?;
        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, (file, (inode, shown))) in frozen.files().iter().zip(members).enumerate() {
            if writers.contains(&index) {
                self.sink.notify(&Notice::new(NoticeKind::FileInUse {
                    path: shown.clone(),
                }));
                self.skipped.push(inode.key());
                continue;
            }
            let (digest, len) =
                hash_file(file.as_ref()).map_err(|source| DedupError::io("hash", shown, source))?;
            let identity = file.identity().map_err(|source| DedupError::io("stat", shown, source))?;
            let volume = self.volume(inode)?;
            if identity.ino != inode.ino || identity.dev != volume.st_dev {
                self.sink.notify(&Notice::new(NoticeKind::FileMoved {
                    path: shown.clone(),
                }));
                self.skipped.push(inode.key());
                continue;
            }
            if len != size {
                if len < volume.record.size_cutoff {
                    self.store.delete_inode(inode.key())?;
                    self.report.dropped += 1;
                } else {
                    self.skipped.push(inode.key());
                }
                continue;
            }
            buckets.entry(digest.value).or_default().push(index);
        }
        Ok(buckets)
    }

    /// Clones the first file of a digest bucket onto the others.
    fn clone_bucket(
        &mut self,
        size: u64,
        frozen: &FrozenFiles,
        members: &[(InodeRecord, PathBuf)],
        bucket: &[usize],
    ) -> Result<(), DedupError> {
        let Some((&source_index, dest_indices)) = bucket.split_first() else {
            return Ok(());
        };
        let (Some(source), Some((source_inode, source_path))) =
            (frozen.file(source_index), members.get(source_index))
        else {
            return Ok(());
        };
        if self.options.defragment_source {
            self.backend
                .defragment(source)
                .map_err(|err| DedupError::io("defragment", source_path, err))?;
        }
        let mut event_inodes = vec![source_inode.key()];
        for &dest_index in dest_indices {
            let (Some(dest), Some((dest_inode, dest_path))) =
                (frozen.file(dest_index), members.get(dest_index))
            else {
                continue;
            };
            let equal = files_equal(source, dest)
                .map_err(|err| DedupError::io("compare", dest_path, err))?;
            if !equal {
                self.sink.notify(&Notice::new(NoticeKind::FilesDiffer {
                    source: source_path.clone(),
                    dest: dest_path.clone(),
                }));
                return Err(DedupError::ContentMismatch {
                    source_path: source_path.display().to_string(),
                    dest_path: dest_path.display().to_string(),
                });
            }
            let outcome = self
                .backend
                .clone_file(dest, source)
                .map_err(|err| DedupError::io("clone onto", dest_path, err))?;
            match outcome {
                CloneOutcome::Cloned => {
                    self.sink.notify(&Notice::new(NoticeKind::Deduplicated {
                        source: source_path.clone(),
                        dest: dest_path.clone(),
                    }));
                    self.report.cloned += 1;
                    event_inodes.push(dest_inode.key());
                }
                CloneOutcome::AlreadyShared => {
                    self.sink.notify(&Notice::new(NoticeKind::AlreadyDeduplicated {
                        source: source_path.clone(),
                        dest: dest_path.clone(),
                    }));
                    self.report.already_shared += 1;
                }
            }
        }
        if event_inodes.len() > 1 {
            let event = self.store.record_dedup_event(self.fs_id, size, Timestamp::now(), &event_inodes)?;
            self.report.events.push(event);
        }
        Ok(())
    }
}

/// Describes a candidate set by its first path.
fn members_desc(members: &[(InodeRecord, PathBuf)]) -> String {
    members.first().map(|(_, path)| path.display().to_string()).unwrap_or_default()
}
