// crates/bedup-btrfs/src/lib.rs
// ============================================================================
// Module: bedup btrfs Library
// Description: Linux system layer for btrfs deduplication.
// Purpose: Implement VolumeBackend with btrfs ioctls and procfs queries.
// Dependencies: bedup-core, libc, thiserror
// ============================================================================

//! ## Overview
//! This crate is the only place bedup talks to the kernel: tree searches for
//! changed inodes, inode path resolution, extent maps, immutable flags,
//! clones, defragmentation, open file limits, and the process table. The
//! mountinfo and blkid parsers feed volume listings.
//!
//! Only 64-bit Linux is supported; ioctl layouts follow that ABI.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backend;
pub mod error;
pub mod mounts;
pub mod procfs;
pub mod search;
mod sys;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backend::BtrfsBackend;
pub use backend::BtrfsFile;
pub use backend::file_extents;
pub use backend::format_uuid;
pub use backend::subvolume_root_id;
pub use error::BtrfsError;
pub use mounts::BlkidEntry;
pub use mounts::MountEntry;
pub use mounts::list_btrfs_devices;
pub use mounts::parse_blkid;
pub use mounts::parse_mountinfo;
pub use mounts::read_mountinfo;
