// crates/bedup-core/src/runtime/mod.rs
// ============================================================================
// Module: bedup Runtime
// Description: Volume registration, scanning, and deduplication passes.
// Purpose: Drive the tracking store and the volume backend.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime is single-threaded and synchronous. A typical run registers
//! the volumes named by the user, scans each of them for updated inodes, and
//! then deduplicates the tracked inodes one filesystem at a time.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod content;
pub mod dedup;
pub mod files;
pub mod find_new;
pub mod freeze;
pub mod registry;
pub mod scanner;
pub mod sinks;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use dedup::DedupError;
pub use dedup::DedupOptions;
pub use dedup::DedupReport;
pub use dedup::dedup_tracked;
pub use files::FileDedupReport;
pub use files::dedup_files;
pub use find_new::FindNewReport;
pub use find_new::find_new;
pub use freeze::FrozenFiles;
pub use registry::MountedVolume;
pub use registry::VolumeRegistry;
pub use registry::forget_volume;
pub use registry::normalize_path;
pub use registry::register_volume;
pub use scanner::ScanError;
pub use scanner::ScanReport;
pub use scanner::track_updated_files;
pub use sinks::CollectingNoticeSink;
pub use sinks::JsonLinesNoticeSink;
pub use sinks::NoticeFormat;
pub use sinks::NoopNoticeSink;
pub use sinks::StderrNoticeSink;
pub use sinks::TeeNoticeSink;
pub use store::InMemoryTrackingStore;
