// crates/bedup-core/src/runtime/store.rs
// ============================================================================
// Module: bedup In-Memory Tracking Store
// Description: Volatile TrackingStore implementation.
// Purpose: Back tests and dry runs without a database file.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`InMemoryTrackingStore`] keeps every table in ordered maps behind one
//! mutex, so each trait call is atomic like a database transaction. Ids are
//! allocated from 1 upwards. Durability switches are accepted and ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::DedupEvent;
use crate::core::DedupEventInode;
use crate::core::EventId;
use crate::core::FilesystemId;
use crate::core::FilesystemRecord;
use crate::core::InodeKey;
use crate::core::InodeRecord;
use crate::core::SizeGroup;
use crate::core::Timestamp;
use crate::core::VolumeId;
use crate::core::VolumeRecord;
use crate::core::VolumeSummary;
use crate::interfaces::Durability;
use crate::interfaces::StoreError;
use crate::interfaces::TrackingStore;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Tables of the in-memory store.
#[derive(Debug, Default)]
struct Tables {
    /// Last allocated row id, shared by every table.
    last_id: i64,
    /// Filesystems by id.
    filesystems: BTreeMap<FilesystemId, FilesystemRecord>,
    /// Volumes by id.
    volumes: BTreeMap<VolumeId, VolumeRecord>,
    /// Recorded volume paths, oldest first.
    volume_paths: Vec<(VolumeId, PathBuf)>,
    /// Tracked inodes.
    inodes: BTreeMap<InodeKey, InodeRecord>,
    /// Dedup events by id.
    events: BTreeMap<EventId, DedupEvent>,
    /// Dedup event members.
    event_inodes: Vec<DedupEventInode>,
}

impl Tables {
    /// Allocates the next row id.
    const fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// Returns the tracked inodes of the given volumes.
    fn inodes_in<'a>(&'a self, vol_ids: &'a [VolumeId]) -> impl Iterator<Item = &'a InodeRecord> {
        self.inodes.values().filter(move |inode| vol_ids.contains(&inode.vol_id))
    }

    /// Groups tracked inodes by size: `(count, any updated)`.
    fn size_stats(&self, vol_ids: &[VolumeId]) -> BTreeMap<u64, (u64, bool)> {
        let mut stats: BTreeMap<u64, (u64, bool)> = BTreeMap::new();
        for inode in self.inodes_in(vol_ids) {
            let entry = stats.entry(inode.size).or_insert((0, false));
            entry.0 += 1;
            entry.1 |= inode.has_updates;
        }
        stats.retain(|_, (count, updated)| *count > 1 && *updated);
        stats
    }
}

/// In-memory tracking store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrackingStore {
    /// Tables protected by a mutex.
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryTrackingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the tables.
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Store("tracking store mutex poisoned".to_string()))
    }

    /// Returns a tracked inode, for inspection in tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store lock is poisoned.
    pub fn inode(&self, key: InodeKey) -> Result<Option<InodeRecord>, StoreError> {
        Ok(self.lock()?.inodes.get(&key).cloned())
    }

    /// Returns a volume row, for inspection in tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store lock is poisoned.
    pub fn volume(&self, id: VolumeId) -> Result<Option<VolumeRecord>, StoreError> {
        Ok(self.lock()?.volumes.get(&id).cloned())
    }
}

/// Converts a freshly allocated raw id.
fn allocated<T>(raw: i64, convert: fn(i64) -> Option<T>) -> Result<T, StoreError> {
    convert(raw).ok_or_else(|| StoreError::Corrupt(format!("invalid row id {raw}")))
}

impl TrackingStore for InMemoryTrackingStore {
    fn get_or_create_filesystem(&self, uuid: &str) -> Result<(FilesystemRecord, bool), StoreError> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.filesystems.values().find(|fs| fs.uuid == uuid) {
            return Ok((existing.clone(), false));
        }
        let id = allocated(tables.next_id(), FilesystemId::from_raw)?;
        let record = FilesystemRecord {
            id,
            uuid: uuid.to_string(),
        };
        tables.filesystems.insert(id, record.clone());
        Ok((record, true))
    }

    fn filesystem_by_uuid(&self, uuid: &str) -> Result<Option<FilesystemRecord>, StoreError> {
        Ok(self.lock()?.filesystems.values().find(|fs| fs.uuid == uuid).cloned())
    }

    fn filesystems(&self) -> Result<Vec<FilesystemRecord>, StoreError> {
        Ok(self.lock()?.filesystems.values().cloned().collect())
    }

    fn get_or_create_volume(
        &self,
        fs_id: FilesystemId,
        root_id: u64,
        default_size_cutoff: u64,
    ) -> Result<(VolumeRecord, bool), StoreError> {
        let mut tables = self.lock()?;
        if !tables.filesystems.contains_key(&fs_id) {
            return Err(StoreError::NotFound(format!("filesystem {fs_id}")));
        }
        if let Some(existing) =
            tables.volumes.values().find(|vol| vol.fs_id == fs_id && vol.root_id == root_id)
        {
            return Ok((existing.clone(), false));
        }
        let id = allocated(tables.next_id(), VolumeId::from_raw)?;
        let record = VolumeRecord {
            id,
            fs_id,
            root_id,
            size_cutoff: default_size_cutoff,
            last_tracked_generation: 0,
            last_tracked_size_cutoff: None,
        };
        tables.volumes.insert(id, record.clone());
        Ok((record, true))
    }

    fn record_volume_path(&self, vol_id: VolumeId, path: &Path) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if !tables.volumes.contains_key(&vol_id) {
            return Err(StoreError::NotFound(format!("volume {vol_id}")));
        }
        tables.volume_paths.retain(|(id, known)| *id != vol_id || known != path);
        tables.volume_paths.push((vol_id, path.to_path_buf()));
        Ok(())
    }

    fn save_volume(&self, volume: &VolumeRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let stored = tables
            .volumes
            .get_mut(&volume.id)
            .ok_or_else(|| StoreError::NotFound(format!("volume {}", volume.id)))?;
        stored.size_cutoff = volume.size_cutoff;
        stored.last_tracked_generation = volume.last_tracked_generation;
        stored.last_tracked_size_cutoff = volume.last_tracked_size_cutoff;
        Ok(())
    }

    fn volumes_of(&self, fs_id: FilesystemId) -> Result<Vec<VolumeSummary>, StoreError> {
        let tables = self.lock()?;
        let summaries = tables
            .volumes
            .values()
            .filter(|vol| vol.fs_id == fs_id)
            .map(|vol| VolumeSummary {
                record: vol.clone(),
                inode_count: tables.inodes.keys().filter(|key| key.vol_id == vol.id).count() as u64,
                last_known_path: tables
                    .volume_paths
                    .iter()
                    .rev()
                    .find(|(id, _)| *id == vol.id)
                    .map(|(_, path)| path.clone()),
            })
            .collect();
        Ok(summaries)
    }

    fn forget_volume(&self, vol_id: VolumeId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let volume = tables
            .volumes
            .get_mut(&vol_id)
            .ok_or_else(|| StoreError::NotFound(format!("volume {vol_id}")))?;
        volume.last_tracked_generation = 0;
        volume.last_tracked_size_cutoff = None;
        tables.inodes.retain(|key, _| key.vol_id != vol_id);
        Ok(())
    }

    fn upsert_inode(&self, vol_id: VolumeId, ino: u64, size: u64) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        if !tables.volumes.contains_key(&vol_id) {
            return Err(StoreError::NotFound(format!("volume {vol_id}")));
        }
        let key = InodeKey::new(vol_id, ino);
        if let Some(inode) = tables.inodes.get_mut(&key) {
            inode.size = size;
            inode.has_updates = true;
            return Ok(false);
        }
        tables.inodes.insert(
            key,
            InodeRecord {
                vol_id,
                ino,
                size,
                has_updates: true,
                mini_hash: None,
                fiemap_hash: None,
            },
        );
        Ok(true)
    }

    fn delete_inode(&self, key: InodeKey) -> Result<(), StoreError> {
        self.lock()?.inodes.remove(&key);
        Ok(())
    }

    fn max_inode_size(&self, vol_ids: &[VolumeId]) -> Result<Option<u64>, StoreError> {
        Ok(self.lock()?.inodes_in(vol_ids).map(|inode| inode.size).max())
    }

    fn count_size_groups(&self, vol_ids: &[VolumeId]) -> Result<u64, StoreError> {
        Ok(self.lock()?.size_stats(vol_ids).len() as u64)
    }

    fn size_groups(
        &self,
        vol_ids: &[VolumeId],
        max_size: u64,
        limit: usize,
    ) -> Result<Vec<SizeGroup>, StoreError> {
        let groups = self
            .lock()?
            .size_stats(vol_ids)
            .range(..=max_size)
            .rev()
            .take(limit)
            .map(|(size, (count, _))| SizeGroup {
                size: *size,
                inode_count: *count,
            })
            .collect();
        Ok(groups)
    }

    fn inodes_of_size(&self, vol_ids: &[VolumeId], size: u64) -> Result<Vec<InodeRecord>, StoreError> {
        Ok(self.lock()?.inodes_in(vol_ids).filter(|inode| inode.size == size).cloned().collect())
    }

    fn save_inode_hashes(&self, inode: &InodeRecord) -> Result<(), StoreError> {
        if let Some(stored) = self.lock()?.inodes.get_mut(&inode.key()) {
            stored.mini_hash = inode.mini_hash;
            stored.fiemap_hash = inode.fiemap_hash;
        }
        Ok(())
    }

    fn clear_updates(&self, vol_ids: &[VolumeId], window_start: u64, window_end: u64) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        for inode in tables.inodes.values_mut() {
            if vol_ids.contains(&inode.vol_id) && inode.size <= window_start && inode.size >= window_end {
                inode.has_updates = false;
            }
        }
        Ok(())
    }

    fn mark_updated(&self, key: InodeKey) -> Result<(), StoreError> {
        if let Some(inode) = self.lock()?.inodes.get_mut(&key) {
            inode.has_updates = true;
        }
        Ok(())
    }

    fn record_dedup_event(
        &self,
        fs_id: FilesystemId,
        item_size: u64,
        created: Timestamp,
        inodes: &[InodeKey],
    ) -> Result<EventId, StoreError> {
        let mut tables = self.lock()?;
        let id = allocated(tables.next_id(), EventId::from_raw)?;
        tables.events.insert(
            id,
            DedupEvent {
                id,
                fs_id,
                item_size,
                created,
                inode_count: inodes.len() as u64,
            },
        );
        tables.event_inodes.extend(inodes.iter().map(|key| DedupEventInode {
            event_id: id,
            vol_id: key.vol_id,
            ino: key.ino,
        }));
        Ok(id)
    }

    fn dedup_events(&self, limit: usize) -> Result<Vec<DedupEvent>, StoreError> {
        Ok(self.lock()?.events.values().rev().take(limit).cloned().collect())
    }

    fn dedup_event_inodes(&self, event_id: EventId) -> Result<Vec<DedupEventInode>, StoreError> {
        Ok(self
            .lock()?
            .event_inodes
            .iter()
            .filter(|inode| inode.event_id == event_id)
            .copied()
            .collect())
    }

    fn set_durability(&self, _durability: Durability) -> Result<(), StoreError> {
        Ok(())
    }
}
