// crates/bedup-btrfs/src/error.rs
// ============================================================================
// Module: btrfs Errors
// Description: Error type for btrfs ioctls and Linux system queries.
// Purpose: Name the failing operation while keeping the OS error kind.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The runtime classifies backend failures by [`io::ErrorKind`], so every
//! [`BtrfsError`] converts back into an [`io::Error`] of the same kind as its
//! cause. The message gains the name of the operation that failed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// btrfs and Linux system errors.
#[derive(Debug, Error)]
pub enum BtrfsError {
    /// An ioctl failed.
    #[error("btrfs {op} ioctl failed: {source}")]
    Ioctl {
        /// Ioctl name.
        op: &'static str,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// A system call other than an ioctl failed.
    #[error("{op} failed: {source}")]
    Sys {
        /// System call name.
        op: &'static str,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// The path is not on a btrfs filesystem.
    #[error("not a btrfs filesystem: {0}")]
    NotBtrfs(String),
    /// The path is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// The path cannot be passed to the kernel.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// The kernel returned data that does not parse.
    #[error("malformed {0} reply")]
    Malformed(&'static str),
    /// The file was not opened by this backend.
    #[error("file was not opened by the btrfs backend: {0}")]
    ForeignFile(String),
}

impl BtrfsError {
    /// Captures `errno` after a failed ioctl.
    pub(crate) fn last_ioctl(op: &'static str) -> Self {
        Self::Ioctl {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Captures `errno` after a failed system call.
    pub(crate) fn last_sys(op: &'static str) -> Self {
        Self::Sys {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Returns the error kind the runtime sees.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Ioctl {
                source, ..
            }
            | Self::Sys {
                source, ..
            } => source.kind(),
            Self::NotBtrfs(_) => io::ErrorKind::Unsupported,
            Self::NotADirectory(_) => io::ErrorKind::NotADirectory,
            Self::InvalidPath(_) | Self::ForeignFile(_) => io::ErrorKind::InvalidInput,
            Self::Malformed(_) => io::ErrorKind::InvalidData,
        }
    }

    /// Returns the raw OS error code, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Ioctl {
                source, ..
            }
            | Self::Sys {
                source, ..
            } => source.raw_os_error(),
            _ => None,
        }
    }
}

impl From<BtrfsError> for io::Error {
    fn from(err: BtrfsError) -> Self {
        Self::new(err.kind(), err)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
