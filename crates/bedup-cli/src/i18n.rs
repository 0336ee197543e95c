// crates/bedup-cli/src/i18n.rs
// ============================================================================
// Module: CLI Internationalization Helpers
// Description: Provides message catalog and translation utilities for the CLI.
// Purpose: Centralize user-facing strings for future localization support.
// Dependencies: Standard library collections and formatting utilities.
// ============================================================================

//! ## Overview
//! The bedup CLI stores user-facing strings in a small translation catalog
//! so messages stay consistent across commands. All runtime output should be
//! routed through the [`t!`](crate::t) macro.
//!
//! ## Invariants
//! - The catalog is initialized once and read-only thereafter.
//! - Missing keys fall back to the key itself to avoid panics.
//! - Placeholder substitutions preserve deterministic order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A formatted message argument captured by the [`macro@crate::t`] macro.
#[derive(Clone)]
pub struct MessageArg {
    /// The placeholder name used in message templates (e.g., `"path"`).
    pub key: &'static str,
    /// The formatted string value to substitute for this placeholder.
    pub value: String,
}

impl MessageArg {
    /// Constructs a new [`MessageArg`] from a key and displayable value.
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Static catalog entries loaded into the localized message bundle.
const CATALOG_ITEMS: &[(&str, &str)] = &[
    ("main.version", "bedup {version}"),
    ("output.stream.stdout", "stdout"),
    ("output.stream.stderr", "stderr"),
    ("output.stream.unknown", "output"),
    ("output.write_failed", "Failed to write to {stream}: {error}"),
    ("config.load_failed", "Failed to load config: {error}"),
    ("config.validate.ok", "Config valid."),
    ("config.validate.defaults", "Config valid (no config file, using defaults)."),
    ("store.open_failed", "Failed to open tracking database at {path}: {error}"),
    ("store.read_failed", "Failed to read tracking database: {error}"),
    ("notices.open_failed", "Failed to open notice log at {path}: {error}"),
    ("volume.open_failed", "Failed to open volume {path}: {error}"),
    ("scan.failed", "Failed to scan volume {volume}: {error}"),
    ("reset.failed", "Failed to reset volume {volume}: {error}"),
    ("reset.ok", "Forgot tracked files of {volume}"),
    ("dedup.failed", "Deduplication failed: {error}"),
    (
        "dedup.summary",
        "Cloned {cloned} files ({shared} already shared, {skipped} left for the next run, \
         {events} events logged)",
    ),
    ("dedup_files.failed", "Deduplication of {source} failed: {error}"),
    ("dedup_files.summary", "Cloned {cloned} files onto {source} ({shared} already shared)"),
    ("find_new.failed", "Failed to list new files in {volume}: {error}"),
    ("find_new.generation", "transid marker was {generation}"),
    ("generation.failed", "Failed to read the generation of {volume}: {error}"),
    ("generation.value", "{generation}"),
    ("log.failed", "Failed to read dedup events: {error}"),
    (
        "log.event",
        "{id}\t{created}\tsize {size}\t{count} inodes\testimated gain {gain}",
    ),
    ("show_vols.devices_failed", "Failed to list btrfs devices: {error}"),
    ("show_vols.mounts_failed", "Failed to read mount table: {error}"),
    ("show_vols.device", "{device}"),
    ("show_vols.label_uuid", "  Label: {label} UUID: {uuid}"),
    ("show_vols.uuid", "  UUID: {uuid}"),
    ("show_vols.unavailable", "<device unavailable>"),
    ("show_vols.inspect_failed", "    Cannot inspect {mountpoint}: {error}"),
    (
        "show_vols.volume",
        "    Volume {root_id} last tracked generation {generation} size cutoff {cutoff}",
    ),
    ("show_vols.inodes", "      {count} inodes tracked"),
    ("show_vols.mounted", "      Mounted on {mountpoint}"),
    ("show_vols.path", "      Path {volpath}"),
    ("show_vols.last_mounted", "      Last mounted on {path}"),
];

// ============================================================================
// SECTION: Translation
// ============================================================================

/// Translates `key` using the English fallback catalog while substituting `args`.
#[must_use]
pub fn translate(key: &str, args: Vec<MessageArg>) -> String {
    let template = catalog().get(key).copied().unwrap_or(key);
    if args.is_empty() {
        return template.to_string();
    }

    let mut result = template.to_string();
    for arg in args {
        let placeholder = format!("{{{}}}", arg.key);
        result = result.replace(&placeholder, &arg.value);
    }
    result
}

/// Returns the static English catalog used by the CLI.
fn catalog() -> &'static HashMap<&'static str, &'static str> {
    static CATALOG: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

    CATALOG.get_or_init(|| CATALOG_ITEMS.iter().copied().collect())
}

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Formats a localized message from a key and named arguments.
///
/// # Arguments
///
/// - `$key` must match a catalog entry.
/// - Named arguments are substituted into `{placeholder}` positions.
#[macro_export]
macro_rules! t {
    ($key:literal $(, $name:ident = $value:expr )* $(,)?) => {{
        let args = ::std::vec![
            $(
                $crate::i18n::MessageArg::new(stringify!($name), $value.to_string()),
            )*
        ];
        $crate::i18n::translate($key, args)
    }};
}
