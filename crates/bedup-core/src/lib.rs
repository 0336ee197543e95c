// crates/bedup-core/src/lib.rs
// ============================================================================
// Module: bedup Core Library
// Description: Public API surface for the bedup core.
// Purpose: Expose tracking types, interfaces, and the dedup runtime.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! bedup core holds the filesystem-independent half of btrfs deduplication:
//! the tracking model, content hashing, the store/backend/notice interfaces,
//! and the runtime that scans volumes for updated inodes and deduplicates
//! identical files. The Linux system layer and the `SQLite` database plug in
//! through [`VolumeBackend`] and [`TrackingStore`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CloneOutcome;
pub use interfaces::DedupFile;
pub use interfaces::Durability;
pub use interfaces::FileIdentity;
pub use interfaces::InodeItems;
pub use interfaces::NoticeSink;
pub use interfaces::StoreError;
pub use interfaces::TrackingStore;
pub use interfaces::VolumeBackend;
pub use interfaces::VolumeHandle;
pub use interfaces::VolumeProbe;
pub use runtime::CollectingNoticeSink;
pub use runtime::DedupError;
pub use runtime::DedupOptions;
pub use runtime::DedupReport;
pub use runtime::FileDedupReport;
pub use runtime::FindNewReport;
pub use runtime::FrozenFiles;
pub use runtime::InMemoryTrackingStore;
pub use runtime::JsonLinesNoticeSink;
pub use runtime::MountedVolume;
pub use runtime::NoopNoticeSink;
pub use runtime::NoticeFormat;
pub use runtime::ScanError;
pub use runtime::ScanReport;
pub use runtime::StderrNoticeSink;
pub use runtime::TeeNoticeSink;
pub use runtime::VolumeRegistry;
pub use runtime::dedup_files;
pub use runtime::dedup_tracked;
pub use runtime::find_new;
pub use runtime::forget_volume;
pub use runtime::normalize_path;
pub use runtime::register_volume;
pub use runtime::track_updated_files;
