// crates/bedup-core/src/core/mod.rs
// ============================================================================
// Module: bedup Core Types
// Description: Identifiers, tracking records, hashing, and notices.
// Purpose: Group the data model shared by every bedup crate.
// Dependencies: serde, sha2
// ============================================================================

//! ## Overview
//! Core types are plain data: they carry no file descriptors and no database
//! handles, so they can cross the store and backend boundaries freely.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod notice;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::*;
pub use identifiers::*;
pub use model::*;
pub use notice::*;
pub use time::*;
