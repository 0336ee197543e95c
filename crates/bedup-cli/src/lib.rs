// crates/bedup-cli/src/lib.rs
// ============================================================================
// Module: bedup CLI Library
// Description: Shared helpers for the bedup command-line interface.
// Purpose: Provide reusable components (i18n, volume listing) for the binary.
// Dependencies: bedup-btrfs, bedup-core
// ============================================================================

//! ## Overview
//! This library houses the message catalog and the volume listing renderer.
//! The binary entry point (`src/main.rs`) imports these helpers to keep all
//! user-facing output consistent.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Internationalization helpers and message catalog.
pub mod i18n;
/// Volume listing for `show-vols`.
pub mod volumes;

#[cfg(test)]
mod tests;
