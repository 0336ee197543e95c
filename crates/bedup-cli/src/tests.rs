// crates/bedup-cli/src/tests.rs
// ============================================================================
// Module: CLI Test Lint Configuration
// Description: Shared test-only lint relaxations for CLI unit tests.
// Purpose: Allow panic-based assertions in tests.
// Dependencies: bedup-cli
// ============================================================================

//! ## Overview
//! Provides test-only lint relaxations for CLI unit tests.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Modules
// ============================================================================

mod volumes;
