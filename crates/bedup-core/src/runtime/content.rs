// crates/bedup-core/src/runtime/content.rs
// ============================================================================
// Module: bedup File Reading
// Description: Positioned read helpers over DedupFile.
// Purpose: Sample, hash, and compare open files.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Reads go through [`DedupFile::read_at`], so a file can be sampled, hashed,
//! and compared without seeking. Short reads are retried until end of file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;

use crate::core::BUFSIZE;
use crate::core::ContentHasher;
use crate::core::DEFAULT_HASH_ALGORITHM;
use crate::core::HashDigest;
use crate::core::MINI_HASH_SAMPLE;
use crate::core::mini_hash;
use crate::core::mini_hash_offset;
use crate::interfaces::DedupFile;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Fills `buf` from `offset`, stopping early only at end of file.
///
/// # Errors
///
/// Returns an I/O error when a read fails.
pub fn read_full_at(file: &dyn DedupFile, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let Some(rest) = buf.get_mut(filled..) else {
            break;
        };
        match file.read_at(offset + filled as u64, rest) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Computes the mini hash of a file whose tracked size is `size`.
///
/// # Errors
///
/// Returns an I/O error when the sample cannot be read.
pub fn file_mini_hash(file: &dyn DedupFile, size: u64) -> io::Result<u64> {
    let mut sample = [0_u8; MINI_HASH_SAMPLE];
    let read = read_full_at(file, mini_hash_offset(size), &mut sample)?;
    Ok(mini_hash(sample.get(..read).unwrap_or_default()))
}

/// Hashes the whole file; returns the digest and the bytes read.
///
/// # Errors
///
/// Returns an I/O error when a read fails.
pub fn hash_file(file: &dyn DedupFile) -> io::Result<(HashDigest, u64)> {
    let mut hasher = ContentHasher::new(DEFAULT_HASH_ALGORITHM);
    let mut buf = vec![0_u8; BUFSIZE];
    loop {
        let read = read_full_at(file, hasher.len(), &mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(buf.get(..read).unwrap_or_default());
    }
    let len = hasher.len();
    Ok((hasher.finish(), len))
}

/// Compares two files byte for byte.
///
/// # Errors
///
/// Returns an I/O error when a read fails.
pub fn files_equal(left: &dyn DedupFile, right: &dyn DedupFile) -> io::Result<bool> {
    let mut left_buf = vec![0_u8; BUFSIZE];
    let mut right_buf = vec![0_u8; BUFSIZE];
    let mut offset = 0_u64;
    loop {
        let left_read = read_full_at(left, offset, &mut left_buf)?;
        let right_read = read_full_at(right, offset, &mut right_buf)?;
        if left_buf.get(..left_read) != right_buf.get(..right_read) {
            return Ok(false);
        }
        if left_read == 0 {
            return Ok(true);
        }
        offset += left_read as u64;
    }
}
