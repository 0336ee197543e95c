// crates/bedup-btrfs/src/sys.rs
// ============================================================================
// Module: btrfs System Calls
// Description: Raw ioctl, openat, statfs, and rlimit wrappers.
// Purpose: Confine every unsafe call of the crate to one audited module.
// Dependencies: libc
// ============================================================================

//! ## Overview
//! Each wrapper owns its kernel argument structure, passes a pointer to it
//! for the duration of one call, and turns a negative return into a
//! [`BtrfsError`] carrying `errno`. Argument layouts mirror the kernel's
//! `linux/btrfs.h` and `linux/fiemap.h` on 64-bit Linux.

#![allow(unsafe_code, reason = "btrfs ioctls, openat, and rlimits have no safe std wrapper.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::CStr;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;

use crate::error::BtrfsError;

// ============================================================================
// SECTION: Ioctl Numbers
// ============================================================================

/// `_IOWR(0x94, 17, struct btrfs_ioctl_search_args)`.
const BTRFS_IOC_TREE_SEARCH: libc::Ioctl = 0xD000_9411;
/// `_IOWR(0x94, 18, struct btrfs_ioctl_ino_lookup_args)`.
const BTRFS_IOC_INO_LOOKUP: libc::Ioctl = 0xD000_9412;
/// `_IOWR(0x94, 35, struct btrfs_ioctl_ino_path_args)`.
const BTRFS_IOC_INO_PATHS: libc::Ioctl = 0xC038_9423;
/// `_IOR(0x94, 31, struct btrfs_ioctl_fs_info_args)`.
const BTRFS_IOC_FS_INFO: libc::Ioctl = 0x8400_941F;
/// `_IOW(0x94, 2, struct btrfs_ioctl_vol_args)`; files pass a null argument.
const BTRFS_IOC_DEFRAG: libc::Ioctl = 0x5000_9402;
/// `_IOW(0x94, 9, int)`.
const FICLONE: libc::Ioctl = 0x4004_9409;
/// `_IOWR('f', 11, struct fiemap)`.
const FS_IOC_FIEMAP: libc::Ioctl = 0xC020_660B;
/// `_IOR('f', 1, long)`.
const FS_IOC_GETFLAGS: libc::Ioctl = 0x8008_6601;
/// `_IOW('f', 2, long)`.
const FS_IOC_SETFLAGS: libc::Ioctl = 0x4008_6602;

/// Inode flag making a file immutable.
pub const FS_IMMUTABLE_FL: libc::c_int = 0x10;
/// Fiemap flag syncing the file before mapping.
pub const FIEMAP_FLAG_SYNC: u32 = 0x1;
/// Fiemap extent flag marking the last extent of the file.
pub const FIEMAP_EXTENT_LAST: u32 = 0x1;

// ============================================================================
// SECTION: Kernel Structures
// ============================================================================

/// Size of the result buffer of a tree search.
pub const SEARCH_BUF_SIZE: usize = 4096 - std::mem::size_of::<SearchKey>();
/// Size of the path buffer of an inode lookup.
pub const INO_LOOKUP_PATH_MAX: usize = 4080;
/// Extents fetched per fiemap call.
pub const FIEMAP_BATCH: u32 = 32;

/// `struct btrfs_ioctl_search_key`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(dead_code, reason = "Layout fields are only touched by the kernel.")]
pub struct SearchKey {
    /// Tree to search; 0 is the tree of the subvolume the fd belongs to.
    pub tree_id: u64,
    /// Smallest key object id.
    pub min_objectid: u64,
    /// Largest key object id.
    pub max_objectid: u64,
    /// Smallest key offset.
    pub min_offset: u64,
    /// Largest key offset.
    pub max_offset: u64,
    /// Smallest item transaction id.
    pub min_transid: u64,
    /// Largest item transaction id.
    pub max_transid: u64,
    /// Smallest key type.
    pub min_type: u32,
    /// Largest key type.
    pub max_type: u32,
    /// Items requested on input, items returned on output.
    pub nr_items: u32,
    /// Reserved.
    pub unused: u32,
    /// Reserved.
    pub unused1: u64,
    /// Reserved.
    pub unused2: u64,
    /// Reserved.
    pub unused3: u64,
    /// Reserved.
    pub unused4: u64,
}

/// `struct btrfs_ioctl_search_args`.
#[repr(C)]
pub struct SearchArgs {
    /// Search key, updated by the kernel.
    pub key: SearchKey,
    /// Headers and items returned by the kernel.
    pub buf: [u8; SEARCH_BUF_SIZE],
}

impl SearchArgs {
    /// Creates zeroed arguments for `key`.
    pub const fn new(key: SearchKey) -> Self {
        Self {
            key,
            buf: [0; SEARCH_BUF_SIZE],
        }
    }
}

/// `struct btrfs_ioctl_ino_lookup_args`.
#[repr(C)]
#[allow(dead_code, reason = "Layout fields are only touched by the kernel.")]
struct InoLookupArgs {
    /// Tree id; 0 asks for the tree of the fd.
    treeid: u64,
    /// Object id to resolve.
    objectid: u64,
    /// Nul-terminated path.
    name: [u8; INO_LOOKUP_PATH_MAX],
}

/// `struct btrfs_ioctl_ino_path_args`.
#[repr(C)]
#[allow(dead_code, reason = "Layout fields are only touched by the kernel.")]
struct InoPathArgs {
    /// Inode number.
    inum: u64,
    /// Size of the buffer behind `fspath`.
    size: u64,
    /// Reserved.
    reserved: [u64; 4],
    /// Address of a `struct btrfs_data_container`.
    fspath: u64,
}

/// `struct btrfs_ioctl_fs_info_args`.
#[repr(C)]
#[allow(dead_code, reason = "Layout fields are only touched by the kernel.")]
struct FsInfoArgs {
    /// Highest device id.
    max_id: u64,
    /// Number of devices.
    num_devices: u64,
    /// Filesystem uuid.
    fsid: [u8; 16],
    /// Node size.
    nodesize: u32,
    /// Sector size.
    sectorsize: u32,
    /// Clone alignment.
    clone_alignment: u32,
    /// Checksum type.
    csum_type: u16,
    /// Checksum size.
    csum_size: u16,
    /// Request flags.
    flags: u64,
    /// Filesystem generation.
    generation: u64,
    /// Metadata uuid.
    metadata_uuid: [u8; 16],
    /// Reserved.
    reserved: [u8; 944],
}

/// `struct fiemap` without its trailing extent array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code, reason = "Layout fields are only touched by the kernel.")]
pub struct FiemapHeader {
    /// Logical offset to start mapping at.
    pub fm_start: u64,
    /// Logical length to map.
    pub fm_length: u64,
    /// Request flags.
    pub fm_flags: u32,
    /// Extents returned.
    pub fm_mapped_extents: u32,
    /// Capacity of the extent array.
    pub fm_extent_count: u32,
    /// Reserved.
    pub fm_reserved: u32,
}

/// `struct fiemap_extent`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code, reason = "Layout fields are only touched by the kernel.")]
pub struct FiemapExtent {
    /// Logical offset in the file.
    pub fe_logical: u64,
    /// Physical offset on disk.
    pub fe_physical: u64,
    /// Length in bytes.
    pub fe_length: u64,
    /// Reserved.
    pub fe_reserved64: [u64; 2],
    /// Extent flags.
    pub fe_flags: u32,
    /// Reserved.
    pub fe_reserved: [u32; 3],
}

/// `struct fiemap` with room for [`FIEMAP_BATCH`] extents.
#[repr(C)]
#[derive(Debug, Default)]
pub struct FiemapBuffer {
    /// Request and reply header.
    pub header: FiemapHeader,
    /// Returned extents.
    pub extents: [FiemapExtent; FIEMAP_BATCH as usize],
}

// ============================================================================
// SECTION: Ioctl Wrappers
// ============================================================================

/// Issues an ioctl with a pointer argument.
///
/// # Safety
///
/// `arg` must be null or point to a live value whose layout matches what the
/// kernel expects for `request`.
unsafe fn ioctl_ptr<T>(
    fd: BorrowedFd<'_>,
    request: libc::Ioctl,
    arg: *mut T,
    op: &'static str,
) -> Result<libc::c_int, BtrfsError> {
    // SAFETY: the caller guarantees `arg` matches `request`; `fd` is open for
    // the lifetime of the borrow.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, arg) };
    if ret < 0 { Err(BtrfsError::last_ioctl(op)) } else { Ok(ret) }
}

/// Runs one page of `BTRFS_IOC_TREE_SEARCH`.
pub fn tree_search(fd: BorrowedFd<'_>, args: &mut SearchArgs) -> Result<(), BtrfsError> {
    // SAFETY: `args` is a `#[repr(C)]` search_args of exactly 4096 bytes.
    unsafe { ioctl_ptr(fd, BTRFS_IOC_TREE_SEARCH, std::ptr::from_mut(args), "tree search") }?;
    Ok(())
}

/// Returns the id of the subvolume tree containing `fd`.
pub fn subvolume_id(fd: BorrowedFd<'_>) -> Result<u64, BtrfsError> {
    let mut args = InoLookupArgs {
        treeid: 0,
        objectid: bedup_core::FIRST_FREE_OBJECTID,
        name: [0; INO_LOOKUP_PATH_MAX],
    };
    // SAFETY: `args` is a `#[repr(C)]` ino_lookup_args.
    unsafe { ioctl_ptr(fd, BTRFS_IOC_INO_LOOKUP, std::ptr::from_mut(&mut args), "ino lookup") }?;
    Ok(args.treeid)
}

/// Fills `container` with a `btrfs_data_container` listing the paths of
/// inode `ino`, relative to the subvolume of `fd`.
pub fn ino_paths(fd: BorrowedFd<'_>, ino: u64, container: &mut [u64]) -> Result<(), BtrfsError> {
    let mut args = InoPathArgs {
        inum: ino,
        size: u64::try_from(std::mem::size_of_val(container))
            .map_err(|_| BtrfsError::Malformed("ino paths"))?,
        reserved: [0; 4],
        fspath: container.as_mut_ptr() as u64,
    };
    // SAFETY: `args` is a `#[repr(C)]` ino_path_args whose `fspath` points to
    // `container`, writable for `size` bytes for the duration of the call.
    unsafe { ioctl_ptr(fd, BTRFS_IOC_INO_PATHS, std::ptr::from_mut(&mut args), "ino paths") }?;
    Ok(())
}

/// Returns the filesystem uuid of `fd`.
pub fn fs_uuid(fd: BorrowedFd<'_>) -> Result<[u8; 16], BtrfsError> {
    let mut args = FsInfoArgs {
        max_id: 0,
        num_devices: 0,
        fsid: [0; 16],
        nodesize: 0,
        sectorsize: 0,
        clone_alignment: 0,
        csum_type: 0,
        csum_size: 0,
        flags: 0,
        generation: 0,
        metadata_uuid: [0; 16],
        reserved: [0; 944],
    };
    // SAFETY: `args` is a `#[repr(C)]` fs_info_args of exactly 1024 bytes.
    unsafe { ioctl_ptr(fd, BTRFS_IOC_FS_INFO, std::ptr::from_mut(&mut args), "fs info") }?;
    Ok(args.fsid)
}

/// Makes `dest` share every extent of `src` (`FICLONE`).
pub fn clone_file(dest: BorrowedFd<'_>, src: BorrowedFd<'_>) -> Result<(), BtrfsError> {
    // SAFETY: FICLONE takes the source descriptor by value; both fds are open.
    let ret = unsafe { libc::ioctl(dest.as_raw_fd(), FICLONE, src.as_raw_fd()) };
    if ret < 0 { Err(BtrfsError::last_ioctl("clone")) } else { Ok(()) }
}

/// Defragments the file behind `fd`.
pub fn defragment(fd: BorrowedFd<'_>) -> Result<(), BtrfsError> {
    // SAFETY: BTRFS_IOC_DEFRAG on a regular file accepts a null argument.
    unsafe { ioctl_ptr(fd, BTRFS_IOC_DEFRAG, std::ptr::null_mut::<libc::c_void>(), "defrag") }?;
    Ok(())
}

/// Runs one page of `FS_IOC_FIEMAP`.
pub fn fiemap(fd: BorrowedFd<'_>, buffer: &mut FiemapBuffer) -> Result<(), BtrfsError> {
    // SAFETY: `buffer` is a `#[repr(C)]` fiemap header followed by exactly
    // `fm_extent_count` extents.
    unsafe { ioctl_ptr(fd, FS_IOC_FIEMAP, std::ptr::from_mut(buffer), "fiemap") }?;
    Ok(())
}

/// Returns the inode flags of `fd`.
pub fn get_flags(fd: BorrowedFd<'_>) -> Result<libc::c_int, BtrfsError> {
    let mut flags: libc::c_int = 0;
    // SAFETY: the kernel writes an int through the pointer.
    unsafe { ioctl_ptr(fd, FS_IOC_GETFLAGS, std::ptr::from_mut(&mut flags), "getflags") }?;
    Ok(flags)
}

/// Replaces the inode flags of `fd`.
pub fn set_flags(fd: BorrowedFd<'_>, flags: libc::c_int) -> Result<(), BtrfsError> {
    let mut flags = flags;
    // SAFETY: the kernel reads an int through the pointer.
    unsafe { ioctl_ptr(fd, FS_IOC_SETFLAGS, std::ptr::from_mut(&mut flags), "setflags") }?;
    Ok(())
}

// ============================================================================
// SECTION: File System Calls
// ============================================================================

/// Opens `path` relative to the directory `dir`.
pub fn openat(dir: BorrowedFd<'_>, path: &CStr, flags: libc::c_int) -> Result<OwnedFd, BtrfsError> {
    // SAFETY: `path` is nul-terminated and outlives the call.
    let fd = unsafe { libc::openat(dir.as_raw_fd(), path.as_ptr(), flags | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(BtrfsError::last_sys("openat"));
    }
    // SAFETY: `fd` was just returned by openat and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Returns true when `fd` lives on a btrfs filesystem.
pub fn is_btrfs(fd: BorrowedFd<'_>) -> Result<bool, BtrfsError> {
    let mut stat = std::mem::MaybeUninit::<libc::statfs>::uninit();
    // SAFETY: fstatfs fills the whole struct on success.
    let ret = unsafe { libc::fstatfs(fd.as_raw_fd(), stat.as_mut_ptr()) };
    if ret < 0 {
        return Err(BtrfsError::last_sys("fstatfs"));
    }
    // SAFETY: fstatfs returned 0, so the struct is initialized.
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_type == libc::BTRFS_SUPER_MAGIC)
}

// ============================================================================
// SECTION: Resource Limits
// ============================================================================

/// Returns the `(soft, hard)` limits on open file descriptors.
pub fn nofile_limit() -> Result<(u64, u64), BtrfsError> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes one rlimit through the pointer.
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &raw mut limit) };
    if ret < 0 {
        return Err(BtrfsError::last_sys("getrlimit"));
    }
    Ok((limit.rlim_cur, limit.rlim_max))
}

/// Sets the limits on open file descriptors.
pub fn set_nofile_limit(soft: u64, hard: u64) -> Result<(), BtrfsError> {
    let limit = libc::rlimit {
        rlim_cur: soft,
        rlim_max: hard,
    };
    // SAFETY: setrlimit reads one rlimit through the pointer.
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raw const limit) };
    if ret < 0 {
        return Err(BtrfsError::last_sys("setrlimit"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::FiemapExtent;
    use super::FiemapHeader;
    use super::FsInfoArgs;
    use super::InoLookupArgs;
    use super::InoPathArgs;
    use super::SearchArgs;
    use super::SearchKey;

    #[test]
    fn structures_match_kernel_sizes() {
        assert_eq!(size_of::<SearchKey>(), 104);
        assert_eq!(size_of::<SearchArgs>(), 4096);
        assert_eq!(size_of::<InoLookupArgs>(), 4096);
        assert_eq!(size_of::<InoPathArgs>(), 56);
        assert_eq!(size_of::<FsInfoArgs>(), 1024);
        assert_eq!(size_of::<FiemapHeader>(), 32);
        assert_eq!(size_of::<FiemapExtent>(), 56);
    }

    #[test]
    fn open_file_limits_are_readable() {
        let (soft, hard) = super::nofile_limit().unwrap_or((0, 0));
        assert!(soft <= hard);
    }
}
