// crates/bedup-core/src/core/hashing.rs
// ============================================================================
// Module: bedup Content Hashing
// Description: Full-content, partial, and extent-layout hashes for files.
// Purpose: Narrow duplicate candidates cheaply before a verified comparison.
// Dependencies: serde, sha2
// ============================================================================

//! ## Overview
//! Three hashes are used, from cheapest to most expensive:
//! - [`mini_hash`] over a small sample at 30% of the file;
//! - [`extent_map_hash`] over the FIEMAP extent list, which tells whether two
//!   files already share every extent;
//! - [`ContentHasher`], a streaming SHA-256 over the whole file.
//!
//! Only the content hash is relied upon before cloning, and even then the
//! files are compared byte for byte.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::core::model::Extent;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported content hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

/// Default content hash algorithm.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Content digest representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(bytes);
    hasher.finish()
}

// ============================================================================
// SECTION: Streaming Content Hasher
// ============================================================================

/// Streaming content hasher that also counts the bytes it consumed.
#[derive(Clone)]
pub struct ContentHasher {
    /// Underlying SHA-256 state.
    inner: Sha256,
    /// Bytes consumed so far.
    len: u64,
}

impl ContentHasher {
    /// Creates a hasher for the given algorithm.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self {
                inner: Sha256::new(),
                len: 0,
            },
        }
    }

    /// Feeds a chunk of file contents.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len = self.len.saturating_add(chunk.len() as u64);
    }

    /// Returns the number of bytes consumed.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true when nothing has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finalizes the digest.
    #[must_use]
    pub fn finish(self) -> HashDigest {
        HashDigest::new(HashAlgorithm::Sha256, &self.inner.finalize())
    }
}

// ============================================================================
// SECTION: Candidate Hashes
// ============================================================================

/// Hashes a mini hash sample into a 64-bit value.
///
/// The sample is cheap and partial: files that only differ outside of it
/// (zeroed tails, for instance) collide, which later passes sort out.
#[must_use]
pub fn mini_hash(sample: &[u8]) -> u64 {
    let digest = Sha256::digest(sample);
    leading_u64(&digest)
}

/// Hashes an extent layout into a 64-bit value.
///
/// Extents are hashed in the order reported; FIEMAP reports them by logical
/// offset, so equal layouts produce equal hashes.
#[must_use]
pub fn extent_map_hash(extents: &[Extent]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update((extents.len() as u64).to_be_bytes());
    for extent in extents {
        hasher.update(extent.logical.to_be_bytes());
        hasher.update(extent.physical.to_be_bytes());
        hasher.update(extent.length.to_be_bytes());
        hasher.update(extent.flags.to_be_bytes());
    }
    leading_u64(&hasher.finalize())
}

/// Reads the first eight digest bytes as a big-endian integer.
fn leading_u64(digest: &[u8]) -> u64 {
    let mut head = [0_u8; 8];
    for (slot, byte) in head.iter_mut().zip(digest) {
        *slot = *byte;
    }
    u64::from_be_bytes(head)
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input_matches_known_vector() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"");
        assert_eq!(
            digest.value,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn streaming_hash_matches_one_shot_hash() {
        let mut hasher = ContentHasher::new(HashAlgorithm::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.len(), 11);
        assert_eq!(hasher.finish(), hash_bytes(HashAlgorithm::Sha256, b"hello world"));
    }

    #[test]
    fn extent_hash_depends_on_physical_placement() {
        let a = Extent {
            logical: 0,
            physical: 4096,
            length: 4096,
            flags: 0,
        };
        let b = Extent {
            physical: 8192,
            ..a
        };
        assert_eq!(extent_map_hash(&[a]), extent_map_hash(&[a]));
        assert_ne!(extent_map_hash(&[a]), extent_map_hash(&[b]));
        assert_ne!(extent_map_hash(&[]), extent_map_hash(&[a]));
    }
}
