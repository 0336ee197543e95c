// crates/bedup-store-sqlite/src/lib.rs
// ============================================================================
// Module: bedup SQLite Store Library
// Description: SQLite implementation of the tracking store.
// Purpose: Persist volumes, tracked inodes, and the dedup event log.
// Dependencies: bedup-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! `bedup-store-sqlite` keeps the tracking database in a single `SQLite`
//! file. Every [`bedup_core::TrackingStore`] call runs in its own
//! transaction on one mutex-guarded connection.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::*;
