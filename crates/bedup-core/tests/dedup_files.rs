// crates/bedup-core/tests/dedup_files.rs
// ============================================================================
// Module: Explicit File Dedup Tests
// Description: dedup_files against a fake backend.
// Purpose: Ensure explicit dedup refuses anything it cannot verify.
// Dependencies: bedup-core
// ============================================================================

//! ## Overview
//! Explicit file dedup against the fake backend.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use bedup_core::CollectingNoticeSink;
use bedup_core::DedupError;
use bedup_core::NoticeKind;
use bedup_core::dedup_files;
use common::FakeBackend;
use common::pattern;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const VOL: &str = "/mnt/pool";

fn backend() -> FakeBackend {
    let mut backend = FakeBackend::new();
    backend.add_volume(VOL, "8c5ef4a2-7d2e-4b0b-9b43-3fb5c8a1d001", 5, 40);
    backend.add_file(VOL, 257, "a", &pattern(1, 500));
    backend.add_file(VOL, 258, "b", &pattern(1, 500));
    backend.add_file(VOL, 259, "c", &pattern(1, 500));
    backend.add_file(VOL, 260, "other", &pattern(2, 500));
    backend.add_file(VOL, 261, "short", &pattern(1, 400));
    backend
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|name| PathBuf::from(VOL).join(name)).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn clones_first_file_onto_the_rest() {
    let backend = backend();
    let sink = CollectingNoticeSink::new();
    let report = dedup_files(&backend, &sink, &paths(&["a", "b", "c"]), false).unwrap();
    assert_eq!(report.source, PathBuf::from("/mnt/pool/a"));
    assert_eq!(report.cloned, paths(&["b", "c"]));
    assert!(report.already_shared.is_empty());
    assert!(backend.shares_extents(VOL, 257, 258));
    assert!(!backend.is_immutable(VOL, 257));

    let again = dedup_files(&backend, &sink, &paths(&["a", "b"]), false).unwrap();
    assert!(again.cloned.is_empty());
    assert_eq!(again.already_shared, paths(&["b"]));
    assert!(
        sink.notices().iter().any(|notice| matches!(notice.kind, NoticeKind::AlreadyDeduplicated { .. }))
    );
}

#[test]
fn defragments_the_source_on_request() {
    let backend = backend();
    let sink = CollectingNoticeSink::new();
    dedup_files(&backend, &sink, &paths(&["a", "b"]), true).unwrap();
    assert_eq!(backend.defragmented(), vec![PathBuf::from("a")]);
}

#[test]
fn needs_at_least_two_files() {
    let backend = backend();
    let sink = CollectingNoticeSink::new();
    let err = dedup_files(&backend, &sink, &paths(&["a"]), false).unwrap_err();
    assert!(matches!(err, DedupError::TooFewFiles(1)));
}

#[test]
fn size_mismatch_is_an_error() {
    let backend = backend();
    let sink = CollectingNoticeSink::new();
    let err = dedup_files(&backend, &sink, &paths(&["a", "short"]), false).unwrap_err();
    assert!(matches!(err, DedupError::SizeMismatch { ref path } if path == "/mnt/pool/short"));
    assert!(!backend.is_immutable(VOL, 261));
}

#[test]
fn content_mismatch_is_an_error_and_unfreezes() {
    let backend = backend();
    let sink = CollectingNoticeSink::new();
    let err = dedup_files(&backend, &sink, &paths(&["a", "other"]), false).unwrap_err();
    assert!(matches!(err, DedupError::ContentMismatch { .. }));
    assert!(backend.clones().is_empty());
    assert!(!backend.is_immutable(VOL, 257));
    assert!(!backend.is_immutable(VOL, 260));
    assert!(sink.notices().iter().any(|notice| matches!(notice.kind, NoticeKind::FilesDiffer { .. })));
}

#[test]
fn file_in_use_is_an_error() {
    let mut backend = backend();
    backend.mark_writer(VOL, 258);
    let sink = CollectingNoticeSink::new();
    let err = dedup_files(&backend, &sink, &paths(&["a", "b"]), false).unwrap_err();
    assert!(matches!(err, DedupError::InUse { ref path } if path == "/mnt/pool/b"));
    assert!(backend.clones().is_empty());
}

#[test]
fn missing_file_is_an_error() {
    let backend = backend();
    let sink = CollectingNoticeSink::new();
    let err = dedup_files(&backend, &sink, &paths(&["a", "missing"]), false).unwrap_err();
    assert!(matches!(err, DedupError::Io { .. }));
}
