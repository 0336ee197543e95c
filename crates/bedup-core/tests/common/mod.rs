// crates/bedup-core/tests/common/mod.rs
// =============================================================================
// Module: bedup Core Test Helpers
// Description: In-memory volume backend for runtime tests.
// Purpose: Exercise scans and dedup passes without a btrfs filesystem.
// =============================================================================

//! Fake volume backend shared by the runtime test suites.

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use bedup_core::CloneOutcome;
use bedup_core::DedupFile;
use bedup_core::Extent;
use bedup_core::FileIdentity;
use bedup_core::InodeItem;
use bedup_core::InodeItems;
use bedup_core::VolumeBackend;
use bedup_core::VolumeHandle;
use bedup_core::VolumeProbe;

/// Mode bits of a regular file.
pub const REGULAR: u32 = 0o100_644;
/// Mode bits of a directory.
pub const DIRECTORY: u32 = 0o040_755;

/// Mutable state of one fake inode, shared with the files opened on it.
#[derive(Debug)]
pub struct InodeState {
    pub data: Vec<u8>,
    pub extents: Vec<Extent>,
    pub immutable: bool,
}

/// A fake inode.
#[derive(Debug, Clone)]
pub struct FakeInode {
    pub path: PathBuf,
    pub mode: u32,
    pub generation: u64,
    pub state: Arc<Mutex<InodeState>>,
}

/// A fake volume.
#[derive(Debug, Clone)]
pub struct FakeVolume {
    pub uuid: String,
    pub root_id: u64,
    pub st_dev: u64,
    pub generation: u64,
    pub inodes: BTreeMap<u64, FakeInode>,
}

/// A file opened on a fake inode.
pub struct FakeFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
    reported_ino: u64,
    unstable: bool,
    bytes_read: Mutex<u64>,
    state: Arc<Mutex<InodeState>>,
}

impl DedupFile for FakeFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn identity(&self) -> io::Result<FileIdentity> {
        let state = self.state.lock().unwrap();
        Ok(FileIdentity {
            dev: self.dev,
            ino: self.reported_ino,
            size: state.data.len() as u64,
        })
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.lock().unwrap();
        let start = usize::try_from(offset).unwrap().min(state.data.len());
        let end = (start + buf.len()).min(state.data.len());
        let chunk = &state.data[start..end];
        buf[..chunk.len()].copy_from_slice(chunk);
        let mut bytes_read = self.bytes_read.lock().unwrap();
        if self.unstable && *bytes_read >= state.data.len() as u64 {
            for byte in &mut buf[..chunk.len()] {
                *byte ^= 0xff;
            }
        }
        *bytes_read += chunk.len() as u64;
        Ok(chunk.len())
    }

    fn extents(&self) -> io::Result<Vec<Extent>> {
        Ok(self.state.lock().unwrap().extents.clone())
    }

    fn set_immutable(&self, immutable: bool) -> io::Result<bool> {
        let mut state = self.state.lock().unwrap();
        let previous = state.immutable;
        state.immutable = immutable;
        Ok(previous)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// In-memory volume backend.
#[derive(Default)]
pub struct FakeBackend {
    volumes: BTreeMap<PathBuf, FakeVolume>,
    handles: BTreeMap<u32, PathBuf>,
    next_slot: u32,
    busy: BTreeSet<(u64, u64)>,
    denied: BTreeSet<(u64, u64)>,
    writers: BTreeSet<(u64, u64)>,
    unlinked: BTreeSet<(u64, u64)>,
    moved: BTreeSet<(u64, u64)>,
    vanishing: BTreeSet<(u64, u64)>,
    unstable: BTreeSet<(u64, u64)>,
    limits: Mutex<(u64, u64)>,
    clones: Mutex<Vec<(PathBuf, PathBuf)>>,
    defragmented: Mutex<Vec<PathBuf>>,
    closed: Vec<u32>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            limits: Mutex::new((1024, 4096)),
            ..Self::default()
        }
    }

    pub fn add_volume(&mut self, path: &str, uuid: &str, root_id: u64, st_dev: u64) {
        self.volumes.insert(
            PathBuf::from(path),
            FakeVolume {
                uuid: uuid.to_string(),
                root_id,
                st_dev,
                generation: 1,
                inodes: BTreeMap::new(),
            },
        );
    }

    fn volume_mut(&mut self, path: &str) -> &mut FakeVolume {
        self.volumes.get_mut(Path::new(path)).unwrap()
    }

    /// Adds a regular file written at the volume's current generation, with
    /// an extent layout unique to the (device, inode) pair.
    pub fn add_file(&mut self, volume: &str, ino: u64, path: &str, data: &[u8]) {
        self.add_inode(volume, ino, path, data, REGULAR);
    }

    pub fn add_inode(&mut self, volume: &str, ino: u64, path: &str, data: &[u8], mode: u32) {
        let vol = self.volume_mut(volume);
        let extents = vec![Extent {
            logical: 0,
            physical: (vol.st_dev << 40) | (ino << 20),
            length: data.len() as u64,
            flags: 0,
        }];
        vol.inodes.insert(
            ino,
            FakeInode {
                path: PathBuf::from(path),
                mode,
                generation: vol.generation,
                state: Arc::new(Mutex::new(InodeState {
                    data: data.to_vec(),
                    extents,
                    immutable: false,
                })),
            },
        );
    }

    /// Starts a new transaction on the volume.
    pub fn commit(&mut self, volume: &str) {
        self.volume_mut(volume).generation += 1;
    }

    /// Rewrites a file in the current generation.
    pub fn rewrite(&mut self, volume: &str, ino: u64, data: &[u8]) {
        let vol = self.volume_mut(volume);
        let generation = vol.generation;
        let inode = vol.inodes.get_mut(&ino).unwrap();
        inode.generation = generation;
        inode.state.lock().unwrap().data = data.to_vec();
    }

    pub fn remove(&mut self, volume: &str, ino: u64) {
        self.volume_mut(volume).inodes.remove(&ino);
    }

    /// Makes `ino_b` share every extent of `ino_a`.
    pub fn share_extents(&mut self, volume: &str, ino_a: u64, ino_b: u64) {
        let vol = self.volume_mut(volume);
        let extents = vol.inodes[&ino_a].state.lock().unwrap().extents.clone();
        vol.inodes[&ino_b].state.lock().unwrap().extents = extents;
    }

    pub fn mark_busy(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.busy.insert((dev, ino));
    }

    pub fn mark_denied(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.denied.insert((dev, ino));
    }

    pub fn mark_writer(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.writers.insert((dev, ino));
    }

    /// Keeps the inode in tree searches but fails its path lookups.
    pub fn unlink(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.unlinked.insert((dev, ino));
    }

    /// Opened files report another inode number, as if the path now named a
    /// different file.
    pub fn mark_moved(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.moved.insert((dev, ino));
    }

    /// Keeps read-only opens working but fails read-write opens with
    /// `NotFound`.
    pub fn mark_vanishing(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.vanishing.insert((dev, ino));
    }

    /// Opened files return inverted bytes once they have been read through
    /// once.
    pub fn mark_unstable(&mut self, volume: &str, ino: u64) {
        let dev = self.volume_mut(volume).st_dev;
        self.unstable.insert((dev, ino));
    }

    pub fn set_limits(&self, soft: u64, hard: u64) {
        *self.limits.lock().unwrap() = (soft, hard);
    }

    pub fn limits(&self) -> (u64, u64) {
        *self.limits.lock().unwrap()
    }

    pub fn clones(&self) -> Vec<(PathBuf, PathBuf)> {
        self.clones.lock().unwrap().clone()
    }

    pub fn defragmented(&self) -> Vec<PathBuf> {
        self.defragmented.lock().unwrap().clone()
    }

    pub fn closed(&self) -> &[u32] {
        &self.closed
    }

    pub fn is_immutable(&self, volume: &str, ino: u64) -> bool {
        self.volumes[Path::new(volume)].inodes[&ino].state.lock().unwrap().immutable
    }

    pub fn shares_extents(&self, volume: &str, ino_a: u64, ino_b: u64) -> bool {
        let vol = &self.volumes[Path::new(volume)];
        let a = vol.inodes[&ino_a].state.lock().unwrap().extents.clone();
        let b = vol.inodes[&ino_b].state.lock().unwrap().extents.clone();
        a == b
    }

    fn volume_of(&self, handle: VolumeHandle) -> io::Result<&FakeVolume> {
        self.handles
            .get(&handle.slot())
            .and_then(|path| self.volumes.get(path))
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
    }

    fn open_in(&self, volume: &FakeVolume, path: &Path, write: bool) -> io::Result<Box<dyn DedupFile>> {
        let (ino, inode) = volume
            .inodes
            .iter()
            .find(|(_, inode)| inode.path == path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        if write && self.busy.contains(&(volume.st_dev, *ino)) {
            return Err(io::Error::from(io::ErrorKind::ExecutableFileBusy));
        }
        if write && self.denied.contains(&(volume.st_dev, *ino)) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if write && self.vanishing.contains(&(volume.st_dev, *ino)) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let key = (volume.st_dev, *ino);
        Ok(Box::new(FakeFile {
            path: path.to_path_buf(),
            dev: volume.st_dev,
            ino: *ino,
            reported_ino: if self.moved.contains(&key) { *ino + 1_000_000 } else { *ino },
            unstable: self.unstable.contains(&key),
            bytes_read: Mutex::new(0),
            state: Arc::clone(&inode.state),
        }))
    }
}

fn fake(file: &dyn DedupFile) -> &FakeFile {
    file.as_any().downcast_ref::<FakeFile>().unwrap()
}

impl VolumeBackend for FakeBackend {
    fn open_volume(&mut self, path: &Path) -> io::Result<VolumeProbe> {
        let volume = self.volumes.get(path).ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let probe_fields = (volume.uuid.clone(), volume.root_id, volume.st_dev);
        self.next_slot += 1;
        self.handles.insert(self.next_slot, path.to_path_buf());
        Ok(VolumeProbe {
            handle: VolumeHandle::new(self.next_slot),
            fs_uuid: probe_fields.0,
            root_id: probe_fields.1,
            st_dev: probe_fields.2,
        })
    }

    fn close_volume(&mut self, handle: VolumeHandle) {
        if self.handles.remove(&handle.slot()).is_some() {
            self.closed.push(handle.slot());
        }
    }

    fn root_generation(&self, handle: VolumeHandle) -> io::Result<u64> {
        Ok(self.volume_of(handle)?.generation)
    }

    fn inode_items(&self, handle: VolumeHandle, min_generation: u64) -> io::Result<InodeItems<'_>> {
        let volume = self.volume_of(handle)?;
        let items: Vec<io::Result<InodeItem>> = volume
            .inodes
            .iter()
            .filter(|(_, inode)| inode.generation >= min_generation)
            .map(|(ino, inode)| {
                Ok(InodeItem {
                    ino: *ino,
                    transid: inode.generation,
                    generation: inode.generation,
                    size: inode.state.lock().unwrap().data.len() as u64,
                    mode: inode.mode,
                })
            })
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn lookup_ino_path(&self, handle: VolumeHandle, ino: u64) -> io::Result<PathBuf> {
        let volume = self.volume_of(handle)?;
        if self.unlinked.contains(&(volume.st_dev, ino)) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        volume
            .inodes
            .get(&ino)
            .map(|inode| inode.path.clone())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn open_read(&self, handle: VolumeHandle, path: &Path) -> io::Result<Box<dyn DedupFile>> {
        self.open_in(self.volume_of(handle)?, path, false)
    }

    fn open_rw(&self, handle: VolumeHandle, path: &Path) -> io::Result<Box<dyn DedupFile>> {
        self.open_in(self.volume_of(handle)?, path, true)
    }

    fn open_path_rw(&self, path: &Path) -> io::Result<Box<dyn DedupFile>> {
        for (root, volume) in &self.volumes {
            if let Ok(relative) = path.strip_prefix(root) {
                return self.open_in(volume, relative, true);
            }
        }
        Err(io::Error::from(io::ErrorKind::NotFound))
    }

    fn open_file_limit(&self) -> io::Result<(u64, u64)> {
        Ok(self.limits())
    }

    fn set_open_file_soft_limit(&self, soft: u64) -> io::Result<()> {
        self.limits.lock().unwrap().0 = soft;
        Ok(())
    }

    fn writers_among(&self, files: &[Box<dyn DedupFile>]) -> io::Result<BTreeSet<usize>> {
        Ok(files
            .iter()
            .enumerate()
            .filter(|(_, file)| {
                let file = fake(file.as_ref());
                self.writers.contains(&(file.dev, file.ino))
            })
            .map(|(index, _)| index)
            .collect())
    }

    fn clone_file(&self, dest: &dyn DedupFile, src: &dyn DedupFile) -> io::Result<CloneOutcome> {
        let (dest, src) = (fake(dest), fake(src));
        let (data, extents) = {
            let state = src.state.lock().unwrap();
            (state.data.clone(), state.extents.clone())
        };
        let mut dest_state = dest.state.lock().unwrap();
        if dest_state.extents == extents {
            return Ok(CloneOutcome::AlreadyShared);
        }
        dest_state.data = data;
        dest_state.extents = extents;
        self.clones.lock().unwrap().push((src.path.clone(), dest.path.clone()));
        Ok(CloneOutcome::Cloned)
    }

    fn defragment(&self, file: &dyn DedupFile) -> io::Result<()> {
        self.defragmented.lock().unwrap().push(file.path().to_path_buf());
        Ok(())
    }
}

/// Returns `len` bytes of a repeating pattern seeded by `seed`.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}
