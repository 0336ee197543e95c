// crates/bedup-cli/src/volumes.rs
// ============================================================================
// Module: Volume Listing
// Description: Renders the `show-vols` report.
// Purpose: Join blkid devices, live mounts, and tracking rows into one listing.
// Dependencies: bedup-btrfs, bedup-core
// ============================================================================

//! ## Overview
//! Every btrfs device is listed with its label and uuid. Filesystems known to
//! the tracking database list their volumes; a volume shows where it is
//! mounted when a live mount exposes its subvolume root, and otherwise the
//! path it was last opened under. Tracked filesystems with no device present
//! are listed last as unavailable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use bedup_btrfs::BlkidEntry;
use bedup_btrfs::MountEntry;
use bedup_core::VolumeSummary;

use crate::t;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A btrfs device together with its live mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    /// blkid entry of the device.
    pub entry: BlkidEntry,
    /// Mounts of the device, in mount table order.
    pub mounts: Vec<MountEntry>,
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders the volume listing.
///
/// `tracked` maps filesystem uuids to their tracked volumes. `probe_root`
/// returns the subvolume root id of a mount point, or `None` when the mount
/// point is not a subvolume root; a permission error stops probing the
/// remaining mounts of that device, and any other probe error is reported
/// under the device and the mount is skipped.
pub fn render_volumes<P>(
    devices: &[DeviceListing],
    tracked: &BTreeMap<String, Vec<VolumeSummary>>,
    mut probe_root: P,
) -> Vec<String>
where
    P: FnMut(&Path) -> io::Result<Option<u64>>,
{
    let mut lines = Vec::new();
    let mut seen = BTreeSet::new();
    for device in devices {
        lines.push(t!("show_vols.device", device = device.entry.device.display()));
        lines.push(match &device.entry.label {
            Some(label) => t!("show_vols.label_uuid", label = label, uuid = device.entry.uuid),
            None => t!("show_vols.uuid", uuid = device.entry.uuid),
        });
        let Some(volumes) = tracked.get(&device.entry.uuid) else {
            continue;
        };
        seen.insert(device.entry.uuid.as_str());
        let mounted = mounts_by_root(&mut lines, &device.mounts, &mut probe_root);
        for volume in volumes {
            render_volume(&mut lines, volume, mounted.get(&volume.record.root_id));
        }
    }
    for (uuid, volumes) in tracked {
        if seen.contains(uuid.as_str()) {
            continue;
        }
        lines.push(t!("show_vols.unavailable"));
        lines.push(t!("show_vols.uuid", uuid = uuid));
        for volume in volumes {
            render_volume(&mut lines, volume, None);
        }
    }
    lines
}

/// Groups the mounts of one device by the root id of their mount point.
fn mounts_by_root<'a, P>(
    lines: &mut Vec<String>,
    mounts: &'a [MountEntry],
    probe_root: &mut P,
) -> BTreeMap<u64, Vec<&'a MountEntry>>
where
    P: FnMut(&Path) -> io::Result<Option<u64>>,
{
    let mut by_root: BTreeMap<u64, Vec<&MountEntry>> = BTreeMap::new();
    for mount in mounts {
        match probe_root(&mount.mountpoint) {
            Ok(Some(root_id)) => by_root.entry(root_id).or_default().push(mount),
            Ok(None) => {}
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => break,
            Err(err) => lines.push(t!(
                "show_vols.inspect_failed",
                mountpoint = mount.mountpoint.display(),
                error = err
            )),
        }
    }
    by_root
}

/// Renders one tracked volume.
fn render_volume(lines: &mut Vec<String>, volume: &VolumeSummary, mounts: Option<&Vec<&MountEntry>>) {
    lines.push(t!(
        "show_vols.volume",
        root_id = volume.record.root_id,
        generation = volume.record.last_tracked_generation,
        cutoff = volume.record.size_cutoff
    ));
    lines.push(t!("show_vols.inodes", count = volume.inode_count));
    let mounts = mounts.map(Vec::as_slice).unwrap_or_default();
    if let Some(first) = mounts.first() {
        for mount in mounts {
            lines.push(t!("show_vols.mounted", mountpoint = mount.mountpoint.display()));
        }
        lines.push(t!("show_vols.path", volpath = first.volpath.display()));
    } else if let Some(path) = &volume.last_known_path {
        lines.push(t!("show_vols.last_mounted", path = path.display()));
    }
}
