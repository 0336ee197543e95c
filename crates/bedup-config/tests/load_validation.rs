//! Config load validation tests for bedup-config.
// crates/bedup-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, values).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use bedup_config::BedupConfig;
use bedup_config::ConfigError;
use bedup_config::MAX_CONFIG_FILE_SIZE;
use bedup_core::NoticeFormat;
use bedup_store_sqlite::SqliteStoreMode;
use bedup_store_sqlite::SqliteSyncMode;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<BedupConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

fn write_config(contents: &[u8]) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(contents).map_err(|err| err.to_string())?;
    Ok(file)
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    assert_invalid(BedupConfig::load_file(Path::new(&long_path)), "config path exceeds max length")
}

#[test]
fn load_rejects_component_too_long() -> TestResult {
    let path = format!("/tmp/{}/bedup.toml", "b".repeat(300));
    assert_invalid(BedupConfig::load_file(Path::new(&path)), "config path component too long")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let file = write_config(&vec![b'#'; MAX_CONFIG_FILE_SIZE + 1])?;
    assert_invalid(BedupConfig::load_file(file.path()), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8() -> TestResult {
    let file = write_config(&[0xff, 0xfe, 0x00])?;
    assert_invalid(BedupConfig::load_file(file.path()), "config file must be utf-8")
}

#[test]
fn load_rejects_malformed_toml() -> TestResult {
    let file = write_config(b"[dedup\nwindow_size = 3")?;
    assert_invalid(BedupConfig::load_file(file.path()), "config parse error")
}

#[test]
fn load_rejects_zero_window_size() -> TestResult {
    let file = write_config(b"[dedup]\nwindow_size = 0\n")?;
    assert_invalid(BedupConfig::load_file(file.path()), "dedup.window_size")
}

#[test]
fn load_rejects_zero_size_cutoff() -> TestResult {
    let file = write_config(b"[tracking]\ndefault_size_cutoff = 0\n")?;
    assert_invalid(BedupConfig::load_file(file.path()), "tracking.default_size_cutoff")
}

#[test]
fn load_rejects_unknown_journal_mode() -> TestResult {
    let file = write_config(b"[database]\njournal_mode = \"memory\"\n")?;
    assert_invalid(BedupConfig::load_file(file.path()), "config parse error")
}

#[test]
fn load_rejects_missing_explicit_file() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let missing = dir.path().join("absent.toml");
    assert_invalid(BedupConfig::load_resolved(Some(&missing), None, None), "config io error")?;
    assert_invalid(
        BedupConfig::load_resolved(None, Some(OsString::from(&missing)), None),
        "config io error",
    )
}

#[test]
fn missing_implicit_file_yields_defaults() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let implicit = dir.path().join("bedup").join("bedup.toml");
    let config = BedupConfig::load_resolved(None, None, Some(implicit)).map_err(|err| err.to_string())?;
    if config.source.is_some() || config.dedup.window_size != bedup_core::WINDOW_SIZE {
        return Err("expected default config".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_every_section() -> TestResult {
    let file = write_config(
        b"[database]\npath = \"/srv/bedup/db.sqlite\"\njournal_mode = \"delete\"\n\
          sync_mode = \"normal\"\nbusy_timeout_ms = 250\n\n\
          [tracking]\ndefault_size_cutoff = 1048576\n\n\
          [dedup]\nwindow_size = 16\ndefragment_source = true\n\n\
          [notices]\nformat = \"json\"\n",
    )?;
    let config = BedupConfig::load_resolved(None, Some(file.path().as_os_str().to_owned()), None)
        .map_err(|err| err.to_string())?;
    let store = config.store_config(None).map_err(|err| err.to_string())?;
    let checks = [
        store.path == PathBuf::from("/srv/bedup/db.sqlite"),
        store.journal_mode == SqliteStoreMode::Delete,
        store.sync_mode == SqliteSyncMode::Normal,
        store.busy_timeout_ms == 250,
        config.tracking.default_size_cutoff == 1_048_576,
        config.dedup_options(false).window_size == 16,
        config.dedup_options(false).defragment_source,
        config.notices.format == NoticeFormat::Json,
        config.source.as_deref() == Some(file.path()),
    ];
    match checks.iter().position(|check| !*check) {
        None => Ok(()),
        Some(index) => Err(format!("config check {index} failed")),
    }
}

#[test]
fn db_path_override_wins() -> TestResult {
    let file = write_config(b"[database]\npath = \"/srv/bedup/db.sqlite\"\n")?;
    let config = BedupConfig::load_file(file.path()).map_err(|err| err.to_string())?;
    let path = config.database_path(Some(Path::new("/tmp/other.sqlite"))).map_err(|err| err.to_string())?;
    if path == Path::new("/tmp/other.sqlite") { Ok(()) } else { Err("override ignored".to_string()) }
}

#[test]
fn cli_flag_defragments_even_when_config_does_not() -> TestResult {
    let config = BedupConfig::default();
    if config.dedup_options(true).defragment_source && !config.dedup_options(false).defragment_source {
        Ok(())
    } else {
        Err("defragment flag not honored".to_string())
    }
}
