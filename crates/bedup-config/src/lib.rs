// crates/bedup-config/src/lib.rs
// ============================================================================
// Module: bedup Config Library
// Description: Configuration model and validation for bedup.
// Purpose: Single source of truth for bedup.toml semantics.
// Dependencies: bedup-core, bedup-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `bedup-config` defines the configuration model for the `bedup` binary:
//! where the tracking database lives, how it is opened, the default size
//! cutoff for new volumes, dedup windowing, and where notices go. Validation
//! is strict and fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
