// crates/bedup-btrfs/src/backend.rs
// ============================================================================
// Module: btrfs Volume Backend
// Description: VolumeBackend and DedupFile over live btrfs volumes.
// Purpose: Open volumes and files, search trees, and clone extents.
// Dependencies: bedup-core, libc, uuid, crate::{search, sys, procfs}
// ============================================================================

//! ## Overview
//! [`BtrfsBackend`] keeps one open directory per registered volume. Files of
//! a volume are opened relative to that directory with `O_NOFOLLOW`, so a
//! path swapped for a symlink between lookup and open is refused rather than
//! followed.
//!
//! Security posture: paths come from the kernel's own inode back references
//! or from the command line; neither is trusted to stay put, which is why
//! the runtime re-checks device and inode after opening.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ffi::CString;
use std::ffi::OsStr;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;

use bedup_core::CloneOutcome;
use bedup_core::DedupFile;
use bedup_core::Extent;
use bedup_core::FIRST_FREE_OBJECTID;
use bedup_core::FileIdentity;
use bedup_core::InodeItems;
use bedup_core::VolumeBackend;
use bedup_core::VolumeHandle;
use bedup_core::VolumeProbe;
use uuid::Uuid;

use crate::error::BtrfsError;
use crate::procfs;
use crate::search;
use crate::search::InodeItemSearch;
use crate::sys;
use crate::sys::FIEMAP_BATCH;
use crate::sys::FIEMAP_EXTENT_LAST;
use crate::sys::FIEMAP_FLAG_SYNC;
use crate::sys::FS_IMMUTABLE_FL;
use crate::sys::FiemapBuffer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Size in `u64` words of the inode path reply buffer.
const INO_PATHS_WORDS: usize = 512;
/// Size of the `btrfs_data_container` header preceding the offsets.
const DATA_CONTAINER_HEADER: usize = 16;

// ============================================================================
// SECTION: Files
// ============================================================================

/// A file opened by [`BtrfsBackend`].
#[derive(Debug)]
pub struct BtrfsFile {
    /// Open file.
    file: File,
    /// Path the file was opened under.
    path: PathBuf,
}

impl BtrfsFile {
    /// Wraps an open file.
    #[must_use]
    pub const fn new(file: File, path: PathBuf) -> Self {
        Self {
            file,
            path,
        }
    }

    /// Returns the open file.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }
}

impl DedupFile for BtrfsFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn identity(&self) -> io::Result<FileIdentity> {
        let meta = self.file.metadata()?;
        Ok(FileIdentity {
            dev: meta.dev(),
            ino: meta.ino(),
            size: meta.len(),
        })
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        FileExt::read_at(&self.file, buf, offset)
    }

    fn extents(&self) -> io::Result<Vec<Extent>> {
        Ok(file_extents(&self.file)?)
    }

    fn set_immutable(&self, immutable: bool) -> io::Result<bool> {
        let flags = sys::get_flags(self.file.as_fd())?;
        let previous = flags & FS_IMMUTABLE_FL != 0;
        if previous != immutable {
            let flags = if immutable { flags | FS_IMMUTABLE_FL } else { flags & !FS_IMMUTABLE_FL };
            sys::set_flags(self.file.as_fd(), flags)?;
        }
        Ok(previous)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Maps every extent of `file`.
///
/// # Errors
///
/// Returns [`BtrfsError`] when the fiemap ioctl fails.
pub fn file_extents(file: &File) -> Result<Vec<Extent>, BtrfsError> {
    let mut extents = Vec::new();
    let mut start = 0_u64;
    loop {
        let mut buffer = Box::<FiemapBuffer>::default();
        buffer.header.fm_start = start;
        buffer.header.fm_length = u64::MAX - start;
        buffer.header.fm_flags = FIEMAP_FLAG_SYNC;
        buffer.header.fm_extent_count = FIEMAP_BATCH;
        sys::fiemap(file.as_fd(), &mut buffer)?;
        let mapped = buffer.header.fm_mapped_extents.min(FIEMAP_BATCH) as usize;
        let Some(last) = buffer.extents[..mapped].last().copied() else {
            return Ok(extents);
        };
        extents.extend(buffer.extents[..mapped].iter().map(|extent| Extent {
            logical: extent.fe_logical,
            physical: extent.fe_physical,
            length: extent.fe_length,
            flags: extent.fe_flags,
        }));
        if last.fe_flags & FIEMAP_EXTENT_LAST != 0 {
            return Ok(extents);
        }
        start = last.fe_logical.saturating_add(last.fe_length);
    }
}

/// Recovers a [`BtrfsFile`] from a trait object.
fn as_btrfs(file: &dyn DedupFile) -> Result<&BtrfsFile, BtrfsError> {
    file.as_any()
        .downcast_ref::<BtrfsFile>()
        .ok_or_else(|| BtrfsError::ForeignFile(file.path().display().to_string()))
}

// ============================================================================
// SECTION: Backend
// ============================================================================

/// A registered volume.
#[derive(Debug)]
struct OpenVolume {
    /// Volume root directory.
    dir: File,
    /// Subvolume id.
    root_id: u64,
}

/// [`VolumeBackend`] over the running kernel.
#[derive(Debug)]
pub struct BtrfsBackend {
    /// Open volumes by slot.
    volumes: BTreeMap<u32, OpenVolume>,
    /// Next slot number.
    next_slot: u32,
    /// Root of the process table scanned for writers.
    proc_root: PathBuf,
}

impl Default for BtrfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BtrfsBackend {
    /// Creates a backend with no open volumes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            volumes: BTreeMap::new(),
            next_slot: 1,
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Returns the volume behind `handle`.
    fn volume(&self, handle: VolumeHandle) -> io::Result<&OpenVolume> {
        self.volumes.get(&handle.slot()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("unknown volume handle {handle}"))
        })
    }

    /// Opens a file of a volume with `flags`.
    fn open_in(&self, handle: VolumeHandle, path: &Path, flags: libc::c_int) -> io::Result<Box<dyn DedupFile>> {
        let volume = self.volume(handle)?;
        let c_path = path_to_cstring(path)?;
        let fd = sys::openat(volume.dir.as_fd(), &c_path, flags | libc::O_NOFOLLOW | libc::O_NOCTTY)?;
        Ok(Box::new(BtrfsFile::new(File::from(fd), path.to_path_buf())))
    }
}

impl VolumeBackend for BtrfsBackend {
    fn open_volume(&mut self, path: &Path) -> io::Result<VolumeProbe> {
        let dir = OpenOptions::new().read(true).custom_flags(libc::O_DIRECTORY).open(path)?;
        if !sys::is_btrfs(dir.as_fd())? {
            return Err(BtrfsError::NotBtrfs(path.display().to_string()).into());
        }
        let fs_uuid = format_uuid(&sys::fs_uuid(dir.as_fd())?);
        let root_id = sys::subvolume_id(dir.as_fd())?;
        let st_dev = dir.metadata()?.dev();
        let slot = self.next_slot;
        self.next_slot += 1;
        self.volumes.insert(slot, OpenVolume {
            dir,
            root_id,
        });
        Ok(VolumeProbe {
            handle: VolumeHandle::new(slot),
            fs_uuid,
            root_id,
            st_dev,
        })
    }

    fn close_volume(&mut self, handle: VolumeHandle) {
        self.volumes.remove(&handle.slot());
    }

    fn root_generation(&self, handle: VolumeHandle) -> io::Result<u64> {
        let volume = self.volume(handle)?;
        Ok(search::root_generation(volume.dir.as_fd(), volume.root_id)?)
    }

    fn inode_items(&self, handle: VolumeHandle, min_generation: u64) -> io::Result<InodeItems<'_>> {
        let volume = self.volume(handle)?;
        let search = InodeItemSearch::new(volume.dir.as_fd(), min_generation);
        Ok(Box::new(search.map(|item| item.map_err(io::Error::from))))
    }

    fn lookup_ino_path(&self, handle: VolumeHandle, ino: u64) -> io::Result<PathBuf> {
        let volume = self.volume(handle)?;
        let mut container = vec![0_u64; INO_PATHS_WORDS];
        sys::ino_paths(volume.dir.as_fd(), ino, &mut container)?;
        let bytes: Vec<u8> = container.iter().flat_map(|word| word.to_ne_bytes()).collect();
        parse_ino_paths(&bytes)?.into_iter().next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("inode {ino} has no path"))
        })
    }

    fn open_read(&self, handle: VolumeHandle, path: &Path) -> io::Result<Box<dyn DedupFile>> {
        self.open_in(handle, path, libc::O_RDONLY)
    }

    fn open_rw(&self, handle: VolumeHandle, path: &Path) -> io::Result<Box<dyn DedupFile>> {
        self.open_in(handle, path, libc::O_RDWR)
    }

    fn open_path_rw(&self, path: &Path) -> io::Result<Box<dyn DedupFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOFOLLOW | libc::O_NOCTTY)
            .open(path)?;
        Ok(Box::new(BtrfsFile::new(file, path.to_path_buf())))
    }

    fn open_file_limit(&self) -> io::Result<(u64, u64)> {
        Ok(sys::nofile_limit()?)
    }

    fn set_open_file_soft_limit(&self, soft: u64) -> io::Result<()> {
        let (_, hard) = sys::nofile_limit()?;
        Ok(sys::set_nofile_limit(soft, hard)?)
    }

    fn writers_among(&self, files: &[Box<dyn DedupFile>]) -> io::Result<BTreeSet<usize>> {
        let identities = files
            .iter()
            .map(|file| file.identity().map(|id| (id.dev, id.ino)))
            .collect::<io::Result<Vec<_>>>()?;
        let targets: BTreeSet<(u64, u64)> = identities.iter().copied().collect();
        let writers = procfs::open_writers(&self.proc_root, std::process::id(), &targets)?;
        Ok(identities
            .iter()
            .enumerate()
            .filter(|(_, identity)| writers.contains(identity))
            .map(|(index, _)| index)
            .collect())
    }

    fn clone_file(&self, dest: &dyn DedupFile, src: &dyn DedupFile) -> io::Result<CloneOutcome> {
        let dest = as_btrfs(dest)?;
        let src = as_btrfs(src)?;
        if file_extents(&dest.file)? == file_extents(&src.file)? {
            return Ok(CloneOutcome::AlreadyShared);
        }
        let flags = sys::get_flags(dest.file.as_fd())?;
        if flags & FS_IMMUTABLE_FL == 0 {
            sys::clone_file(dest.file.as_fd(), src.file.as_fd())?;
            return Ok(CloneOutcome::Cloned);
        }
        // An immutable destination refuses the clone; it is thawed for the
        // duration of the ioctl only.
        sys::set_flags(dest.file.as_fd(), flags & !FS_IMMUTABLE_FL)?;
        let cloned = sys::clone_file(dest.file.as_fd(), src.file.as_fd());
        let restored = sys::set_flags(dest.file.as_fd(), flags);
        cloned?;
        restored?;
        Ok(CloneOutcome::Cloned)
    }

    fn defragment(&self, file: &dyn DedupFile) -> io::Result<()> {
        Ok(sys::defragment(as_btrfs(file)?.file.as_fd())?)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a path to a nul-terminated string.
fn path_to_cstring(path: &Path) -> Result<CString, BtrfsError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BtrfsError::InvalidPath(path.display().to_string()))
}

/// Formats a filesystem uuid in its hyphenated form.
#[must_use]
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

/// Decodes the paths of a `btrfs_data_container` reply.
///
/// # Errors
///
/// Returns [`BtrfsError::Malformed`] when the element count or an offset
/// points outside the reply.
pub fn parse_ino_paths(bytes: &[u8]) -> Result<Vec<PathBuf>, BtrfsError> {
    let malformed = || BtrfsError::Malformed("ino paths");
    let elem_cnt = bytes
        .get(8..12)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_ne_bytes)
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(malformed)?;
    let offsets_end = elem_cnt
        .checked_mul(8)
        .and_then(|len| len.checked_add(DATA_CONTAINER_HEADER))
        .filter(|end| *end <= bytes.len())
        .ok_or_else(malformed)?;
    let offsets = bytes.get(DATA_CONTAINER_HEADER..offsets_end).ok_or_else(malformed)?;
    let mut paths = Vec::with_capacity(elem_cnt);
    for chunk in offsets.chunks_exact(8) {
        let start = chunk
            .try_into()
            .ok()
            .map(u64::from_ne_bytes)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|offset| offset.checked_add(DATA_CONTAINER_HEADER))
            .ok_or_else(malformed)?;
        let tail = bytes.get(start..).ok_or_else(malformed)?;
        let name = tail
            .split(|byte| *byte == 0)
            .next()
            .filter(|name| name.len() < tail.len())
            .ok_or_else(malformed)?;
        paths.push(PathBuf::from(OsStr::from_bytes(name)));
    }
    Ok(paths)
}

/// Returns the subvolume id of `path` when it is the root directory of a
/// subvolume, or `None` for any other directory.
///
/// # Errors
///
/// Returns an I/O error when the directory cannot be opened or queried;
/// unprivileged callers may see [`io::ErrorKind::PermissionDenied`].
pub fn subvolume_root_id(path: &Path) -> io::Result<Option<u64>> {
    let dir = OpenOptions::new().read(true).custom_flags(libc::O_DIRECTORY).open(path)?;
    if dir.metadata()?.ino() != FIRST_FREE_OBJECTID {
        return Ok(None);
    }
    Ok(Some(sys::subvolume_id(dir.as_fd())?))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
