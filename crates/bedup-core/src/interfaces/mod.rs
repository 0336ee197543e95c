// crates/bedup-core/src/interfaces/mod.rs
// ============================================================================
// Module: bedup Interfaces
// Description: Seams between the runtime, the tracking database, and btrfs.
// Purpose: Keep scan and dedup logic independent of SQLite and of the kernel.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The runtime talks to three collaborators:
//! - a [`TrackingStore`] holding volumes, tracked inodes, and the event log;
//! - a [`VolumeBackend`] that opens volumes and files and issues the btrfs
//!   ioctls (tree search, inode path lookup, clone, defragment);
//! - a [`NoticeSink`] receiving progress and outcome notices.
//!
//! Backend failures are plain [`std::io::Error`]s; the runtime only looks at
//! their [`std::io::ErrorKind`] to decide whether a file is skipped, dropped
//! from tracking, or the whole pass fails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::DedupEvent;
use crate::core::DedupEventInode;
use crate::core::EventId;
use crate::core::Extent;
use crate::core::FilesystemId;
use crate::core::FilesystemRecord;
use crate::core::InodeItem;
use crate::core::InodeKey;
use crate::core::InodeRecord;
use crate::core::Notice;
use crate::core::SizeGroup;
use crate::core::Timestamp;
use crate::core::VolumeId;
use crate::core::VolumeRecord;
use crate::core::VolumeSummary;

// ============================================================================
// SECTION: Tracking Store
// ============================================================================

/// Tracking store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store I/O error.
    #[error("tracking store io error: {0}")]
    Io(String),
    /// Store backend error.
    #[error("tracking store error: {0}")]
    Store(String),
    /// Store data is corrupted.
    #[error("tracking store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("tracking store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data or arguments are invalid.
    #[error("tracking store invalid data: {0}")]
    Invalid(String),
    /// A referenced row does not exist.
    #[error("tracking store row not found: {0}")]
    NotFound(String),
}

/// Durability level for database commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Every commit is synced to disk.
    Full,
    /// Commits may be lost on a crash but the database stays consistent.
    Relaxed,
}

/// Persistent tracking database.
///
/// Every method is atomic on its own; there is no caller-visible transaction.
pub trait TrackingStore {
    /// Returns the filesystem with the given uuid, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read or written.
    fn get_or_create_filesystem(&self, uuid: &str)
    -> Result<(FilesystemRecord, bool), StoreError>;

    /// Returns the filesystem with the given uuid, if known.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn filesystem_by_uuid(&self, uuid: &str) -> Result<Option<FilesystemRecord>, StoreError>;

    /// Lists every known filesystem ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn filesystems(&self) -> Result<Vec<FilesystemRecord>, StoreError>;

    /// Returns the volume `(fs_id, root_id)`, creating it if needed.
    ///
    /// New volumes start with `size_cutoff = default_size_cutoff` and have
    /// never been scanned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read or written.
    fn get_or_create_volume(
        &self,
        fs_id: FilesystemId,
        root_id: u64,
        default_size_cutoff: u64,
    ) -> Result<(VolumeRecord, bool), StoreError>;

    /// Records a path a volume was opened under.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn record_volume_path(&self, vol_id: VolumeId, path: &Path) -> Result<(), StoreError>;

    /// Persists the cutoff and tracking fields of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown volumes.
    fn save_volume(&self, volume: &VolumeRecord) -> Result<(), StoreError>;

    /// Lists the volumes of a filesystem with tracking statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn volumes_of(&self, fs_id: FilesystemId) -> Result<Vec<VolumeSummary>, StoreError>;

    /// Drops every tracked inode of a volume and resets its scan state.
    ///
    /// The dedup event log is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn forget_volume(&self, vol_id: VolumeId) -> Result<(), StoreError>;

    /// Creates or updates a tracked inode, setting its size and marking it
    /// updated. Returns true when the row was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn upsert_inode(&self, vol_id: VolumeId, ino: u64, size: u64) -> Result<bool, StoreError>;

    /// Stops tracking an inode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn delete_inode(&self, key: InodeKey) -> Result<(), StoreError>;

    /// Returns the largest tracked size among the volumes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn max_inode_size(&self, vol_ids: &[VolumeId]) -> Result<Option<u64>, StoreError>;

    /// Counts the size groups the next dedup pass would visit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn count_size_groups(&self, vol_ids: &[VolumeId]) -> Result<u64, StoreError>;

    /// Returns up to `limit` size groups with `size <= max_size`, more than
    /// one member, and at least one updated member, largest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn size_groups(
        &self,
        vol_ids: &[VolumeId],
        max_size: u64,
        limit: usize,
    ) -> Result<Vec<SizeGroup>, StoreError>;

    /// Returns every tracked inode of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn inodes_of_size(
        &self,
        vol_ids: &[VolumeId],
        size: u64,
    ) -> Result<Vec<InodeRecord>, StoreError>;

    /// Persists the mini and fiemap hashes of an inode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn save_inode_hashes(&self, inode: &InodeRecord) -> Result<(), StoreError>;

    /// Clears `has_updates` for sizes in `[window_end, window_start]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn clear_updates(
        &self,
        vol_ids: &[VolumeId],
        window_start: u64,
        window_end: u64,
    ) -> Result<(), StoreError>;

    /// Marks an inode as updated again so the next pass revisits it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn mark_updated(&self, key: InodeKey) -> Result<(), StoreError>;

    /// Appends a dedup event and its inodes to the event log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be written.
    fn record_dedup_event(
        &self,
        fs_id: FilesystemId,
        item_size: u64,
        created: Timestamp,
        inodes: &[InodeKey],
    ) -> Result<EventId, StoreError>;

    /// Lists dedup events, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn dedup_events(&self, limit: usize) -> Result<Vec<DedupEvent>, StoreError>;

    /// Lists the inodes of a dedup event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn dedup_event_inodes(&self, event_id: EventId) -> Result<Vec<DedupEventInode>, StoreError>;

    /// Switches commit durability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the setting cannot be applied.
    fn set_durability(&self, durability: Durability) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Volume Backend
// ============================================================================

/// Opaque handle to a volume opened by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeHandle(u32);

impl VolumeHandle {
    /// Creates a handle from a backend-assigned slot number.
    #[must_use]
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    /// Returns the backend slot number.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a freshly opened volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeProbe {
    /// Handle for later backend calls.
    pub handle: VolumeHandle,
    /// Filesystem uuid.
    pub fs_uuid: String,
    /// Subvolume root id.
    pub root_id: u64,
    /// Device number reported by `stat` for files of the volume.
    pub st_dev: u64,
}

/// Identity of an open file, as reported by `fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    /// Device number.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Result of a clone request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    /// The destination now shares the source's extents.
    Cloned,
    /// The files already shared every extent; nothing was done.
    AlreadyShared,
}

/// Iterator over inode items of a tree search.
pub type InodeItems<'a> = Box<dyn Iterator<Item = io::Result<InodeItem>> + 'a>;

/// An open file taking part in dedup.
pub trait DedupFile {
    /// Path the file was opened under, relative to its volume when opened
    /// through one.
    fn path(&self) -> &Path;

    /// Returns the current device, inode, and size.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when `fstat` fails.
    fn identity(&self) -> io::Result<FileIdentity>;

    /// Reads at an absolute offset; returns 0 at end of file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the read fails.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns the extent layout of the file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the mapping cannot be queried.
    fn extents(&self) -> io::Result<Vec<Extent>>;

    /// Sets or clears the immutable attribute; returns the previous state.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the attribute cannot be changed.
    fn set_immutable(&self, immutable: bool) -> io::Result<bool>;

    /// Upcast used by backends to recover their concrete file type.
    fn as_any(&self) -> &dyn Any;
}

/// Access to btrfs volumes and files.
pub trait VolumeBackend {
    /// Opens a volume directory and reports its identity.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the path is not an accessible btrfs volume.
    fn open_volume(&mut self, path: &Path) -> io::Result<VolumeProbe>;

    /// Closes a volume handle. Unknown handles are ignored.
    fn close_volume(&mut self, handle: VolumeHandle);

    /// Returns the current generation of the volume's tree.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the generation cannot be read.
    fn root_generation(&self, handle: VolumeHandle) -> io::Result<u64>;

    /// Iterates inode items whose transaction id is at least `min_generation`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the search cannot start.
    fn inode_items(&self, handle: VolumeHandle, min_generation: u64)
    -> io::Result<InodeItems<'_>>;

    /// Resolves an inode number to one of its paths within the volume.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotFound`] when the inode no longer exists.
    fn lookup_ino_path(&self, handle: VolumeHandle, ino: u64) -> io::Result<PathBuf>;

    /// Opens a file of the volume read-only.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    fn open_read(&self, handle: VolumeHandle, path: &Path) -> io::Result<Box<dyn DedupFile>>;

    /// Opens a file of the volume read-write.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened; running
    /// executables yield [`io::ErrorKind::ExecutableFileBusy`].
    fn open_rw(&self, handle: VolumeHandle, path: &Path) -> io::Result<Box<dyn DedupFile>>;

    /// Opens an arbitrary path read-write.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    fn open_path_rw(&self, path: &Path) -> io::Result<Box<dyn DedupFile>>;

    /// Returns the `(soft, hard)` open file limits.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the limits cannot be read.
    fn open_file_limit(&self) -> io::Result<(u64, u64)>;

    /// Raises the soft open file limit.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the limit cannot be changed.
    fn set_open_file_soft_limit(&self, soft: u64) -> io::Result<()>;

    /// Returns the indices of files that another process holds open for
    /// writing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when open files cannot be enumerated.
    fn writers_among(&self, files: &[Box<dyn DedupFile>]) -> io::Result<BTreeSet<usize>>;

    /// Clones `src` onto `dest`, unless they already share every extent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the clone fails.
    fn clone_file(&self, dest: &dyn DedupFile, src: &dyn DedupFile) -> io::Result<CloneOutcome>;

    /// Defragments a file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when defragmentation fails.
    fn defragment(&self, file: &dyn DedupFile) -> io::Result<()>;
}

// ============================================================================
// SECTION: Notices
// ============================================================================

/// Receiver of scan and dedup notices.
pub trait NoticeSink: Send + Sync {
    /// Records a notice.
    fn notify(&self, notice: &Notice);
}
