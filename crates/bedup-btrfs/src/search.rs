// crates/bedup-btrfs/src/search.rs
// ============================================================================
// Module: btrfs Tree Search
// Description: Paged TREE_SEARCH over inode and root items.
// Purpose: Turn raw search buffers into inode items and generations.
// Dependencies: bedup-core, crate::sys
// ============================================================================

//! ## Overview
//! A tree search returns a packed sequence of `(header, item)` pairs. Each
//! page holds at most [`SEARCH_PAGE_ITEMS`] items; the next page starts just
//! past the last returned key, carrying from offset into type and from type
//! into object id.
//!
//! Parsing is kept separate from the ioctl so it can be checked against
//! hand-built buffers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::os::fd::BorrowedFd;

use bedup_core::InodeItem;

use crate::error::BtrfsError;
use crate::sys;
use crate::sys::SearchArgs;
use crate::sys::SearchKey;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Items requested per search page.
pub const SEARCH_PAGE_ITEMS: u32 = 4096;
/// Key type of inode items.
pub const INODE_ITEM_KEY: u32 = 1;
/// Key type of root items.
pub const ROOT_ITEM_KEY: u32 = 132;
/// Largest key type.
pub const MAX_KEY_TYPE: u32 = 255;
/// Object id of the tree of tree roots.
pub const ROOT_TREE_OBJECTID: u64 = 1;
/// Size of `struct btrfs_ioctl_search_header`.
pub const SEARCH_HEADER_SIZE: usize = 32;
/// Bytes of `struct btrfs_inode_item` read by the parser.
pub const INODE_ITEM_MIN_SIZE: usize = 56;

// ============================================================================
// SECTION: Search Headers
// ============================================================================

/// `struct btrfs_ioctl_search_header`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHeader {
    /// Transaction id of the item.
    pub transid: u64,
    /// Key object id.
    pub objectid: u64,
    /// Key offset.
    pub offset: u64,
    /// Key type.
    pub item_type: u32,
    /// Item length in bytes.
    pub len: u32,
}

/// Reads a native-endian `u64` at `offset`.
fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset + 8)?;
    Some(u64::from_ne_bytes(bytes.try_into().ok()?))
}

/// Reads a native-endian `u32` at `offset`.
fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

/// Splits a search buffer into `nr_items` headers and their item bytes.
///
/// # Errors
///
/// Returns [`BtrfsError::Malformed`] when a header or item runs past the end
/// of the buffer.
pub fn parse_items(buf: &[u8], nr_items: u32) -> Result<Vec<(SearchHeader, &[u8])>, BtrfsError> {
    let mut items = Vec::new();
    let mut pos = 0_usize;
    for _ in 0..nr_items {
        let header = SearchHeader {
            transid: read_u64(buf, pos).ok_or(BtrfsError::Malformed("tree search"))?,
            objectid: read_u64(buf, pos + 8).ok_or(BtrfsError::Malformed("tree search"))?,
            offset: read_u64(buf, pos + 16).ok_or(BtrfsError::Malformed("tree search"))?,
            item_type: read_u32(buf, pos + 24).ok_or(BtrfsError::Malformed("tree search"))?,
            len: read_u32(buf, pos + 28).ok_or(BtrfsError::Malformed("tree search"))?,
        };
        let start = pos + SEARCH_HEADER_SIZE;
        let len = usize::try_from(header.len).map_err(|_| BtrfsError::Malformed("tree search"))?;
        let data = buf.get(start..start + len).ok_or(BtrfsError::Malformed("tree search"))?;
        items.push((header, data));
        pos = start + len;
    }
    Ok(items)
}

/// Decodes a `struct btrfs_inode_item` found under `header`.
///
/// # Errors
///
/// Returns [`BtrfsError::Malformed`] when the item is too short.
pub fn parse_inode_item(header: &SearchHeader, data: &[u8]) -> Result<InodeItem, BtrfsError> {
    if data.len() < INODE_ITEM_MIN_SIZE {
        return Err(BtrfsError::Malformed("inode item"));
    }
    Ok(InodeItem {
        ino: header.objectid,
        transid: header.transid,
        generation: read_u64(data, 0).ok_or(BtrfsError::Malformed("inode item"))?,
        size: read_u64(data, 16).ok_or(BtrfsError::Malformed("inode item"))?,
        mode: read_u32(data, 52).ok_or(BtrfsError::Malformed("inode item"))?,
    })
}

/// Moves `key` just past `last`; returns false once the key space is spent.
pub const fn advance_key(key: &mut SearchKey, last: &SearchHeader) -> bool {
    key.min_objectid = last.objectid;
    key.min_type = last.item_type;
    if last.offset < u64::MAX {
        key.min_offset = last.offset + 1;
        return true;
    }
    key.min_offset = 0;
    if last.item_type < MAX_KEY_TYPE {
        key.min_type = last.item_type + 1;
        return true;
    }
    key.min_type = 0;
    if last.objectid < u64::MAX {
        key.min_objectid = last.objectid + 1;
        return true;
    }
    false
}

// ============================================================================
// SECTION: Inode Item Search
// ============================================================================

/// Search key for inode items of the fd's subvolume changed since
/// `min_generation`.
#[must_use]
pub const fn inode_items_key(min_generation: u64) -> SearchKey {
    SearchKey {
        tree_id: 0,
        min_objectid: 0,
        max_objectid: u64::MAX,
        min_offset: 0,
        max_offset: u64::MAX,
        min_transid: min_generation,
        max_transid: u64::MAX,
        min_type: 0,
        max_type: INODE_ITEM_KEY,
        nr_items: SEARCH_PAGE_ITEMS,
        unused: 0,
        unused1: 0,
        unused2: 0,
        unused3: 0,
        unused4: 0,
    }
}

/// Iterator over inode items, fetching one search page at a time.
pub struct InodeItemSearch<'a> {
    /// Volume directory.
    fd: BorrowedFd<'a>,
    /// Ioctl arguments, reused across pages.
    args: Box<SearchArgs>,
    /// Items of the current page not yet yielded.
    pending: VecDeque<InodeItem>,
    /// Set once the key space is exhausted or an error was yielded.
    done: bool,
}

impl<'a> InodeItemSearch<'a> {
    /// Starts a search over the subvolume of `fd`.
    #[must_use]
    pub fn new(fd: BorrowedFd<'a>, min_generation: u64) -> Self {
        Self {
            fd,
            args: Box::new(SearchArgs::new(inode_items_key(min_generation))),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Fetches the next page into `pending`.
    fn fetch_page(&mut self) -> Result<(), BtrfsError> {
        self.args.key.nr_items = SEARCH_PAGE_ITEMS;
        sys::tree_search(self.fd, &mut self.args)?;
        let nr_items = self.args.key.nr_items;
        if nr_items == 0 {
            self.done = true;
            return Ok(());
        }
        let items = parse_items(&self.args.buf, nr_items)?;
        let mut last = None;
        for (header, data) in items {
            if header.item_type == INODE_ITEM_KEY {
                self.pending.push_back(parse_inode_item(&header, data)?);
            }
            last = Some(header);
        }
        if let Some(last) = last
            && !advance_key(&mut self.args.key, &last)
        {
            self.done = true;
        }
        Ok(())
    }
}

impl Iterator for InodeItemSearch<'_> {
    type Item = Result<InodeItem, BtrfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending.is_empty() && !self.done {
            if let Err(err) = self.fetch_page() {
                self.done = true;
                return Some(Err(err));
            }
        }
        self.pending.pop_front().map(Ok)
    }
}

// ============================================================================
// SECTION: Root Generation
// ============================================================================

/// Returns the generation of subvolume `root_id`: the highest transaction id
/// among its root items in the tree of tree roots.
///
/// # Errors
///
/// Returns [`BtrfsError`] when the search fails or returns malformed data.
pub fn root_generation(fd: BorrowedFd<'_>, root_id: u64) -> Result<u64, BtrfsError> {
    let key = SearchKey {
        tree_id: ROOT_TREE_OBJECTID,
        min_objectid: root_id,
        max_objectid: root_id,
        min_type: ROOT_ITEM_KEY,
        max_type: ROOT_ITEM_KEY,
        max_offset: u64::MAX,
        max_transid: u64::MAX,
        nr_items: SEARCH_PAGE_ITEMS,
        ..SearchKey::default()
    };
    let mut args = Box::new(SearchArgs::new(key));
    sys::tree_search(fd, &mut args)?;
    let items = parse_items(&args.buf, args.key.nr_items)?;
    Ok(items
        .iter()
        .filter(|(header, _)| header.item_type == ROOT_ITEM_KEY)
        .map(|(header, _)| header.transid)
        .max()
        .unwrap_or(0))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
