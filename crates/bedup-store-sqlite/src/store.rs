// crates/bedup-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Tracking Store
// Description: Durable TrackingStore backed by SQLite.
// Purpose: Persist scan state, tracked inodes, and dedup events across runs.
// Dependencies: bedup-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`TrackingStore`] using `SQLite`. The
//! schema holds filesystems, their volumes, the paths volumes were opened
//! under, tracked inodes, and an append-only dedup event log.
//!
//! Unsigned kernel values (sizes, inode numbers, generations) are stored as
//! `INTEGER` and must fit in `i64`; hashes are stored bit for bit.
//! Security posture: database contents are untrusted and every row is
//! validated when read back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use bedup_core::DedupEvent;
use bedup_core::DedupEventInode;
use bedup_core::Durability;
use bedup_core::EventId;
use bedup_core::FilesystemId;
use bedup_core::FilesystemRecord;
use bedup_core::InodeKey;
use bedup_core::InodeRecord;
use bedup_core::SizeGroup;
use bedup_core::StoreError;
use bedup_core::Timestamp;
use bedup_core::TrackingStore;
use bedup_core::VolumeId;
use bedup_core::VolumeRecord;
use bedup_core::VolumeSummary;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` tracking store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode outside dedup passes.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a configuration with default pragmas for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// A stored row does not decode.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid arguments or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// A referenced row does not exist.
    #[error("sqlite store row not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed tracking store.
///
/// # Invariants
/// - Connection access is serialized through a mutex.
/// - Every trait call commits or rolls back its own transaction.
#[derive(Debug, Clone)]
pub struct SqliteTrackingStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Connection shared by every operation.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteTrackingStore {
    /// Opens or creates an `SQLite`-backed tracking store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unusable or the database
    /// cannot be opened or initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Runs `op` inside a transaction and commits on success.
    fn with_tx<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;
        let value = op(&tx)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(value)
    }
}

impl TrackingStore for SqliteTrackingStore {
    fn get_or_create_filesystem(&self, uuid: &str) -> Result<(FilesystemRecord, bool), StoreError> {
        self.with_tx(|tx| {
            if let Some(existing) = query_filesystem(tx, uuid)? {
                return Ok((existing, false));
            }
            tx.execute("INSERT INTO filesystems (uuid) VALUES (?1)", params![uuid])?;
            let id = filesystem_id(tx.last_insert_rowid())?;
            Ok((
                FilesystemRecord {
                    id,
                    uuid: uuid.to_string(),
                },
                true,
            ))
        })
    }

    fn filesystem_by_uuid(&self, uuid: &str) -> Result<Option<FilesystemRecord>, StoreError> {
        self.with_tx(|tx| query_filesystem(tx, uuid))
    }

    fn filesystems(&self) -> Result<Vec<FilesystemRecord>, StoreError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare("SELECT id, uuid FROM filesystems ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, uuid)| {
                    Ok(FilesystemRecord {
                        id: filesystem_id(id)?,
                        uuid,
                    })
                })
                .collect()
        })
    }

    fn get_or_create_volume(
        &self,
        fs_id: FilesystemId,
        root_id: u64,
        default_size_cutoff: u64,
    ) -> Result<(VolumeRecord, bool), StoreError> {
        self.with_tx(|tx| {
            let known: Option<i64> = tx
                .query_row("SELECT id FROM filesystems WHERE id = ?1", params![fs_id.get()], |row| {
                    row.get(0)
                })
                .optional()?;
            if known.is_none() {
                return Err(SqliteStoreError::NotFound(format!("filesystem {fs_id}")));
            }
            let root = to_sql(root_id, "root_id")?;
            let existing = query_volume(
                tx,
                "WHERE fs_id = ?1 AND root_id = ?2",
                &[fs_id.get(), root],
            )?;
            if let Some(existing) = existing.into_iter().next() {
                return Ok((existing, false));
            }
            tx.execute(
                "INSERT INTO volumes (fs_id, root_id, size_cutoff, last_tracked_generation) \
                 VALUES (?1, ?2, ?3, 0)",
                params![fs_id.get(), root, to_sql(default_size_cutoff, "size_cutoff")?],
            )?;
            let record = VolumeRecord {
                id: volume_id(tx.last_insert_rowid())?,
                fs_id,
                root_id,
                size_cutoff: default_size_cutoff,
                last_tracked_generation: 0,
                last_tracked_size_cutoff: None,
            };
            Ok((record, true))
        })
    }

    fn record_volume_path(&self, vol_id: VolumeId, path: &Path) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            ensure_volume(tx, vol_id)?;
            let bytes = path.as_os_str().as_bytes();
            tx.execute(
                "DELETE FROM volume_path_history WHERE vol_id = ?1 AND path = ?2",
                params![vol_id.get(), bytes],
            )?;
            tx.execute(
                "INSERT INTO volume_path_history (vol_id, path) VALUES (?1, ?2)",
                params![vol_id.get(), bytes],
            )?;
            Ok(())
        })
    }

    fn save_volume(&self, volume: &VolumeRecord) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let last_cutoff = volume
                .last_tracked_size_cutoff
                .map(|cutoff| to_sql(cutoff, "last_tracked_size_cutoff"))
                .transpose()?;
            let updated = tx.execute(
                "UPDATE volumes SET size_cutoff = ?1, last_tracked_generation = ?2, \
                 last_tracked_size_cutoff = ?3 WHERE id = ?4",
                params![
                    to_sql(volume.size_cutoff, "size_cutoff")?,
                    to_sql(volume.last_tracked_generation, "last_tracked_generation")?,
                    last_cutoff,
                    volume.id.get()
                ],
            )?;
            if updated == 0 {
                return Err(SqliteStoreError::NotFound(format!("volume {}", volume.id)));
            }
            Ok(())
        })
    }

    fn volumes_of(&self, fs_id: FilesystemId) -> Result<Vec<VolumeSummary>, StoreError> {
        self.with_tx(|tx| {
            let volumes = query_volume(tx, "WHERE fs_id = ?1", &[fs_id.get()])?;
            let mut summaries = Vec::with_capacity(volumes.len());
            for record in volumes {
                let inode_count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM inodes WHERE vol_id = ?1",
                    params![record.id.get()],
                    |row| row.get(0),
                )?;
                let last_path: Option<Vec<u8>> = tx
                    .query_row(
                        "SELECT path FROM volume_path_history WHERE vol_id = ?1 \
                         ORDER BY id DESC LIMIT 1",
                        params![record.id.get()],
                        |row| row.get(0),
                    )
                    .optional()?;
                summaries.push(VolumeSummary {
                    record,
                    inode_count: from_sql(inode_count, "inode count")?,
                    last_known_path: last_path
                        .map(|bytes| PathBuf::from(OsStr::from_bytes(&bytes))),
                });
            }
            Ok(summaries)
        })
    }

    fn forget_volume(&self, vol_id: VolumeId) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            ensure_volume(tx, vol_id)?;
            tx.execute("DELETE FROM inodes WHERE vol_id = ?1", params![vol_id.get()])?;
            tx.execute(
                "UPDATE volumes SET last_tracked_generation = 0, last_tracked_size_cutoff = NULL \
                 WHERE id = ?1",
                params![vol_id.get()],
            )?;
            Ok(())
        })
    }

    fn upsert_inode(&self, vol_id: VolumeId, ino: u64, size: u64) -> Result<bool, StoreError> {
        self.with_tx(|tx| {
            ensure_volume(tx, vol_id)?;
            let ino = to_sql(ino, "ino")?;
            let size = to_sql(size, "size")?;
            let updated = tx.execute(
                "UPDATE inodes SET size = ?3, has_updates = 1 WHERE vol_id = ?1 AND ino = ?2",
                params![vol_id.get(), ino, size],
            )?;
            if updated > 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO inodes (vol_id, ino, size, has_updates) VALUES (?1, ?2, ?3, 1)",
                params![vol_id.get(), ino, size],
            )?;
            Ok(true)
        })
    }

    fn delete_inode(&self, key: InodeKey) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM inodes WHERE vol_id = ?1 AND ino = ?2",
                params![key.vol_id.get(), to_sql(key.ino, "ino")?],
            )?;
            Ok(())
        })
    }

    fn max_inode_size(&self, vol_ids: &[VolumeId]) -> Result<Option<u64>, StoreError> {
        if vol_ids.is_empty() {
            return Ok(None);
        }
        self.with_tx(|tx| {
            let sql = format!("SELECT MAX(size) FROM inodes WHERE vol_id IN ({})", placeholders(vol_ids.len()));
            let max: Option<i64> = tx.query_row(&sql, params_from_iter(ids(vol_ids)), |row| row.get(0))?;
            max.map(|size| from_sql(size, "size")).transpose()
        })
    }

    fn count_size_groups(&self, vol_ids: &[VolumeId]) -> Result<u64, StoreError> {
        if vol_ids.is_empty() {
            return Ok(0);
        }
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT COUNT(*) FROM (SELECT size FROM inodes WHERE vol_id IN ({}) GROUP BY size \
                 HAVING COUNT(*) > 1 AND MAX(has_updates) = 1)",
                placeholders(vol_ids.len())
            );
            let count: i64 = tx.query_row(&sql, params_from_iter(ids(vol_ids)), |row| row.get(0))?;
            from_sql(count, "group count")
        })
    }

    fn size_groups(
        &self,
        vol_ids: &[VolumeId],
        max_size: u64,
        limit: usize,
    ) -> Result<Vec<SizeGroup>, StoreError> {
        if vol_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT size, COUNT(*) FROM inodes WHERE vol_id IN ({}) AND size <= ?{} \
                 GROUP BY size HAVING COUNT(*) > 1 AND MAX(has_updates) = 1 \
                 ORDER BY size DESC LIMIT ?{}",
                placeholders(vol_ids.len()),
                vol_ids.len() + 1,
                vol_ids.len() + 2
            );
            let mut values = ids(vol_ids);
            values.push(i64::try_from(max_size).unwrap_or(i64::MAX));
            values.push(i64::try_from(limit).unwrap_or(i64::MAX));
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(size, count)| {
                    Ok(SizeGroup {
                        size: from_sql(size, "size")?,
                        inode_count: from_sql(count, "group count")?,
                    })
                })
                .collect()
        })
    }

    fn inodes_of_size(&self, vol_ids: &[VolumeId], size: u64) -> Result<Vec<InodeRecord>, StoreError> {
        if vol_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT vol_id, ino, size, has_updates, mini_hash, fiemap_hash FROM inodes \
                 WHERE vol_id IN ({}) AND size = ?{} ORDER BY vol_id, ino",
                placeholders(vol_ids.len()),
                vol_ids.len() + 1
            );
            let mut values = ids(vol_ids);
            values.push(to_sql(size, "size")?);
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok(InodeRow {
                        vol_id: row.get(0)?,
                        ino: row.get(1)?,
                        size: row.get(2)?,
                        has_updates: row.get(3)?,
                        mini_hash: row.get(4)?,
                        fiemap_hash: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(InodeRow::into_record).collect()
        })
    }

    fn save_inode_hashes(&self, inode: &InodeRecord) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE inodes SET mini_hash = ?3, fiemap_hash = ?4 WHERE vol_id = ?1 AND ino = ?2",
                params![
                    inode.vol_id.get(),
                    to_sql(inode.ino, "ino")?,
                    inode.mini_hash.map(hash_to_sql),
                    inode.fiemap_hash.map(hash_to_sql)
                ],
            )?;
            Ok(())
        })
    }

    fn clear_updates(
        &self,
        vol_ids: &[VolumeId],
        window_start: u64,
        window_end: u64,
    ) -> Result<(), StoreError> {
        if vol_ids.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            let sql = format!(
                "UPDATE inodes SET has_updates = 0 WHERE vol_id IN ({}) AND size <= ?{} AND size >= ?{}",
                placeholders(vol_ids.len()),
                vol_ids.len() + 1,
                vol_ids.len() + 2
            );
            let mut values = ids(vol_ids);
            values.push(i64::try_from(window_start).unwrap_or(i64::MAX));
            values.push(i64::try_from(window_end).unwrap_or(i64::MAX));
            tx.execute(&sql, params_from_iter(values))?;
            Ok(())
        })
    }

    fn mark_updated(&self, key: InodeKey) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE inodes SET has_updates = 1 WHERE vol_id = ?1 AND ino = ?2",
                params![key.vol_id.get(), to_sql(key.ino, "ino")?],
            )?;
            Ok(())
        })
    }

    fn record_dedup_event(
        &self,
        fs_id: FilesystemId,
        item_size: u64,
        created: Timestamp,
        inodes: &[InodeKey],
    ) -> Result<EventId, StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO dedup_events (fs_id, item_size, created) VALUES (?1, ?2, ?3)",
                params![fs_id.get(), to_sql(item_size, "item_size")?, created.as_unix_millis()],
            )?;
            let id = event_id(tx.last_insert_rowid())?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO dedup_event_inodes (event_id, vol_id, ino) VALUES (?1, ?2, ?3)",
            )?;
            for key in inodes {
                stmt.execute(params![id.get(), key.vol_id.get(), to_sql(key.ino, "ino")?])?;
            }
            Ok(id)
        })
    }

    fn dedup_events(&self, limit: usize) -> Result<Vec<DedupEvent>, StoreError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT e.id, e.fs_id, e.item_size, e.created, \
                 (SELECT COUNT(*) FROM dedup_event_inodes i WHERE i.event_id = e.id) \
                 FROM dedup_events e ORDER BY e.id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, fs, item_size, created, count)| {
                    Ok(DedupEvent {
                        id: event_id(id)?,
                        fs_id: filesystem_id(fs)?,
                        item_size: from_sql(item_size, "item_size")?,
                        created: Timestamp::from_unix_millis(created),
                        inode_count: from_sql(count, "inode count")?,
                    })
                })
                .collect()
        })
    }

    fn dedup_event_inodes(&self, event: EventId) -> Result<Vec<DedupEventInode>, StoreError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT vol_id, ino FROM dedup_event_inodes WHERE event_id = ?1 ORDER BY vol_id, ino",
            )?;
            let rows = stmt
                .query_map(params![event.get()], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(vol, ino)| {
                    Ok(DedupEventInode {
                        event_id: event,
                        vol_id: volume_id(vol)?,
                        ino: from_sql(ino, "ino")?,
                    })
                })
                .collect()
        })
    }

    fn set_durability(&self, durability: Durability) -> Result<(), StoreError> {
        let mode = match durability {
            Durability::Full => self.config.sync_mode,
            Durability::Relaxed => SqliteSyncMode::Normal,
        };
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite mutex poisoned".to_string()))?;
        guard
            .execute_batch(&format!("PRAGMA synchronous = {};", mode.pragma_value()))
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Raw `inodes` row.
struct InodeRow {
    /// Volume id.
    vol_id: i64,
    /// Inode number.
    ino: i64,
    /// Size in bytes.
    size: i64,
    /// Update mark.
    has_updates: bool,
    /// Mini hash bits.
    mini_hash: Option<i64>,
    /// Fiemap hash bits.
    fiemap_hash: Option<i64>,
}

impl InodeRow {
    /// Validates the row.
    fn into_record(self) -> Result<InodeRecord, SqliteStoreError> {
        Ok(InodeRecord {
            vol_id: volume_id(self.vol_id)?,
            ino: from_sql(self.ino, "ino")?,
            size: from_sql(self.size, "size")?,
            has_updates: self.has_updates,
            mini_hash: self.mini_hash.map(hash_from_sql),
            fiemap_hash: self.fiemap_hash.map(hash_from_sql),
        })
    }
}

/// Looks up a filesystem by uuid.
fn query_filesystem(tx: &Transaction<'_>, uuid: &str) -> Result<Option<FilesystemRecord>, SqliteStoreError> {
    let id: Option<i64> = tx
        .query_row("SELECT id FROM filesystems WHERE uuid = ?1", params![uuid], |row| row.get(0))
        .optional()?;
    id.map(|id| {
        Ok(FilesystemRecord {
            id: filesystem_id(id)?,
            uuid: uuid.to_string(),
        })
    })
    .transpose()
}

/// Loads volumes matching `filter`, ordered by id.
fn query_volume(
    tx: &Transaction<'_>,
    filter: &str,
    values: &[i64],
) -> Result<Vec<VolumeRecord>, SqliteStoreError> {
    let sql = format!(
        "SELECT id, fs_id, root_id, size_cutoff, last_tracked_generation, last_tracked_size_cutoff \
         FROM volumes {filter} ORDER BY id"
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, fs, root, cutoff, generation, last_cutoff)| {
            Ok(VolumeRecord {
                id: volume_id(id)?,
                fs_id: filesystem_id(fs)?,
                root_id: from_sql(root, "root_id")?,
                size_cutoff: from_sql(cutoff, "size_cutoff")?,
                last_tracked_generation: from_sql(generation, "last_tracked_generation")?,
                last_tracked_size_cutoff: last_cutoff
                    .map(|value| from_sql(value, "last_tracked_size_cutoff"))
                    .transpose()?,
            })
        })
        .collect()
}

/// Fails with [`SqliteStoreError::NotFound`] for unknown volumes.
fn ensure_volume(tx: &Transaction<'_>, vol_id: VolumeId) -> Result<(), SqliteStoreError> {
    let known: Option<i64> = tx
        .query_row("SELECT id FROM volumes WHERE id = ?1", params![vol_id.get()], |row| row.get(0))
        .optional()?;
    if known.is_none() {
        return Err(SqliteStoreError::NotFound(format!("volume {vol_id}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Value Conversions
// ============================================================================

/// Builds `?1, ?2, ...` for `count` parameters.
fn placeholders(count: usize) -> String {
    (1..=count).map(|index| format!("?{index}")).collect::<Vec<_>>().join(", ")
}

/// Raw volume ids for an `IN` clause.
fn ids(vol_ids: &[VolumeId]) -> Vec<i64> {
    vol_ids.iter().map(|id| id.get()).collect()
}

/// Converts an unsigned value for storage.
fn to_sql(value: u64, field: &str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Invalid(format!("{field} out of range: {value}")))
}

/// Converts a stored value back to unsigned.
fn from_sql(value: i64, field: &str) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative {field}: {value}")))
}

/// Stores a hash bit for bit.
const fn hash_to_sql(value: u64) -> i64 {
    i64::from_ne_bytes(value.to_ne_bytes())
}

/// Restores a hash stored with [`hash_to_sql`].
const fn hash_from_sql(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes())
}

/// Validates a filesystem row id.
fn filesystem_id(raw: i64) -> Result<FilesystemId, SqliteStoreError> {
    FilesystemId::from_raw(raw).ok_or_else(|| SqliteStoreError::Corrupt(format!("invalid filesystem id {raw}")))
}

/// Validates a volume row id.
fn volume_id(raw: i64) -> Result<VolumeId, SqliteStoreError> {
    VolumeId::from_raw(raw).ok_or_else(|| SqliteStoreError::Corrupt(format!("invalid volume id {raw}")))
}

/// Validates an event row id.
fn event_id(raw: i64) -> Result<EventId, SqliteStoreError> {
    EventId::from_raw(raw).ok_or_else(|| SqliteStoreError::Corrupt(format!("invalid event id {raw}")))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(SqliteStoreError::Invalid("store path contains an overlong component".to_string()));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid("store path must be a file, not a directory".to_string()));
    }
    Ok(())
}

/// Opens an `SQLite` connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection.execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Initializes the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS filesystems (
                    id INTEGER PRIMARY KEY,
                    uuid TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS volumes (
                    id INTEGER PRIMARY KEY,
                    fs_id INTEGER NOT NULL REFERENCES filesystems(id) ON DELETE CASCADE,
                    root_id INTEGER NOT NULL,
                    size_cutoff INTEGER NOT NULL,
                    last_tracked_generation INTEGER NOT NULL DEFAULT 0,
                    last_tracked_size_cutoff INTEGER,
                    UNIQUE (fs_id, root_id)
                );
                CREATE TABLE IF NOT EXISTS volume_path_history (
                    id INTEGER PRIMARY KEY,
                    vol_id INTEGER NOT NULL REFERENCES volumes(id) ON DELETE CASCADE,
                    path BLOB NOT NULL,
                    UNIQUE (vol_id, path)
                );
                CREATE TABLE IF NOT EXISTS inodes (
                    vol_id INTEGER NOT NULL REFERENCES volumes(id) ON DELETE CASCADE,
                    ino INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    has_updates INTEGER NOT NULL,
                    mini_hash INTEGER,
                    fiemap_hash INTEGER,
                    PRIMARY KEY (vol_id, ino)
                );
                CREATE INDEX IF NOT EXISTS idx_inodes_size ON inodes (size, vol_id);
                CREATE TABLE IF NOT EXISTS dedup_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    fs_id INTEGER NOT NULL REFERENCES filesystems(id) ON DELETE CASCADE,
                    item_size INTEGER NOT NULL,
                    created INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS dedup_event_inodes (
                    event_id INTEGER NOT NULL REFERENCES dedup_events(id) ON DELETE CASCADE,
                    vol_id INTEGER NOT NULL,
                    ino INTEGER NOT NULL,
                    PRIMARY KEY (event_id, vol_id, ino)
                );",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit()?;
    Ok(())
}
