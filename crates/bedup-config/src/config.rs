// crates/bedup-config/src/config.rs
// ============================================================================
// Module: bedup Configuration
// Description: Configuration loading and validation for bedup.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: bedup-core, bedup-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The file is located through `--config`, then `BEDUP_CONFIG`, then the XDG
//! config directory. An explicitly named file must exist; a missing file at
//! the XDG location means every setting takes its default.
//! Security posture: config inputs are untrusted and invalid values fail
//! closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use bedup_core::DEFAULT_SIZE_CUTOFF;
use bedup_core::DedupOptions;
use bedup_core::NoticeFormat;
use bedup_core::WINDOW_SIZE;
use bedup_store_sqlite::SqliteStoreConfig;
use bedup_store_sqlite::SqliteStoreMode;
use bedup_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Config filename inside the XDG config directory.
const DEFAULT_CONFIG_NAME: &str = "bedup.toml";
/// Application directory name under the XDG base directories.
const APP_DIR_NAME: &str = "bedup";
/// Database filename inside the XDG data directory.
const DEFAULT_DATABASE_NAME: &str = "db.sqlite";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "BEDUP_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum `SQLite` busy timeout in milliseconds.
const MAX_BUSY_TIMEOUT_MS: u64 = 600_000;
/// Maximum number of size groups fetched per dedup window.
const MAX_WINDOW_SIZE: usize = 65_536;

// ============================================================================
// SECTION: Top-Level Config
// ============================================================================

/// bedup configuration loaded from `bedup.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BedupConfig {
    /// Tracking database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Scan settings.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Dedup pass settings.
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Notice output settings.
    #[serde(default)]
    pub notices: NoticesConfig,
    /// File the configuration was read from, if any (not serialized).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl BedupConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var_os(CONFIG_ENV_VAR);
        let implicit = default_config_path(env::var_os("XDG_CONFIG_HOME"), env::var_os("HOME"));
        Self::load_resolved(path, env_path, implicit)
    }

    /// Loads configuration with the resolution inputs supplied by the caller.
    ///
    /// `path` and `env_path` name files that must exist; `implicit` is read
    /// only when present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_resolved(
        path: Option<&Path>,
        env_path: Option<OsString>,
        implicit: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let resolved = match (path, env_path) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(env_path)) => PathBuf::from(env_path),
            (None, None) => match implicit {
                Some(implicit) if implicit.exists() => implicit,
                _ => {
                    let mut config = Self::default();
                    config.validate()?;
                    return Ok(config);
                }
            },
        };
        Self::load_file(&resolved)
    }

    /// Loads and validates one configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, oversized, not
    /// UTF-8, malformed, or invalid.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.source = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.tracking.validate()?;
        self.dedup.validate()?;
        self.notices.validate()?;
        Ok(())
    }

    /// Returns the tracking database path, with `override_path` taking
    /// precedence over the configured and default locations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no location can be determined or the
    /// override is invalid.
    pub fn database_path(&self, override_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = override_path {
            validate_path_string("--db-path", &path.to_string_lossy())?;
            return Ok(path.to_path_buf());
        }
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        default_database_path(env::var_os("XDG_DATA_HOME"), env::var_os("HOME")).ok_or_else(|| {
            ConfigError::Invalid(
                "database.path is unset and neither XDG_DATA_HOME nor HOME is set".to_string(),
            )
        })
    }

    /// Builds the `SQLite` store configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the database path cannot be determined.
    pub fn store_config(&self, override_path: Option<&Path>) -> Result<SqliteStoreConfig, ConfigError> {
        Ok(SqliteStoreConfig {
            path: self.database_path(override_path)?,
            busy_timeout_ms: self.database.busy_timeout_ms,
            journal_mode: self.database.journal_mode,
            sync_mode: self.database.sync_mode,
        })
    }

    /// Builds dedup options, with `defragment` forcing source defragmentation.
    #[must_use]
    pub const fn dedup_options(&self, defragment: bool) -> DedupOptions {
        DedupOptions {
            window_size: self.dedup.window_size,
            defragment_source: defragment || self.dedup.defragment_source,
        }
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; defaults to `$XDG_DATA_HOME/bedup/db.sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode outside dedup passes.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    /// Validates database configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("database.path", &path.to_string_lossy())?;
        }
        if self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "database.busy_timeout_ms must be at most {MAX_BUSY_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }
}

/// `[tracking]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TrackingConfig {
    /// Size cutoff given to volumes seen for the first time.
    #[serde(default = "default_size_cutoff")]
    pub default_size_cutoff: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_size_cutoff: DEFAULT_SIZE_CUTOFF,
        }
    }
}

impl TrackingConfig {
    /// Validates tracking configuration.
    fn validate(self) -> Result<(), ConfigError> {
        if self.default_size_cutoff == 0 {
            return Err(ConfigError::Invalid(
                "tracking.default_size_cutoff must be greater than zero".to_string(),
            ));
        }
        if i64::try_from(self.default_size_cutoff).is_err() {
            return Err(ConfigError::Invalid("tracking.default_size_cutoff is too large".to_string()));
        }
        Ok(())
    }
}

/// `[dedup]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DedupConfig {
    /// Size groups fetched per window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Defragment clone sources before cloning.
    #[serde(default)]
    pub defragment_source: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            defragment_source: false,
        }
    }
}

impl DedupConfig {
    /// Validates dedup configuration.
    fn validate(self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::Invalid(format!(
                "dedup.window_size must be between 1 and {MAX_WINDOW_SIZE}"
            )));
        }
        Ok(())
    }
}

/// `[notices]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NoticesConfig {
    /// Rendering of notices written to stderr.
    #[serde(default)]
    pub format: NoticeFormat,
    /// Optional JSON-lines file that receives a copy of every notice.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl NoticesConfig {
    /// Validates notice configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("notices.path", &path.to_string_lossy())?;
            if path.is_dir() {
                return Err(ConfigError::Invalid("notices.path must be a file".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default size cutoff.
const fn default_size_cutoff() -> u64 {
    DEFAULT_SIZE_CUTOFF
}

/// Returns the default dedup window size.
const fn default_window_size() -> usize {
    WINDOW_SIZE
}

/// Resolves an XDG base directory: the variable when set to an absolute
/// path, else `$HOME/<fallback>`.
fn xdg_base(var: Option<OsString>, home: Option<OsString>, fallback: &str) -> Option<PathBuf> {
    if let Some(value) = var.map(PathBuf::from)
        && value.is_absolute()
    {
        return Some(value);
    }
    home.filter(|home| !home.is_empty()).map(|home| PathBuf::from(home).join(fallback))
}

/// Returns `$XDG_CONFIG_HOME/bedup/bedup.toml` (fallback `~/.config`).
#[must_use]
pub fn default_config_path(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    xdg_base(xdg_config_home, home, ".config")
        .map(|base| base.join(APP_DIR_NAME).join(DEFAULT_CONFIG_NAME))
}

/// Returns `$XDG_DATA_HOME/bedup/db.sqlite` (fallback `~/.local/share`).
#[must_use]
pub fn default_database_path(xdg_data_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    xdg_base(xdg_data_home, home, ".local/share")
        .map(|base| base.join(APP_DIR_NAME).join(DEFAULT_DATABASE_NAME))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test fixtures use explicit asserts and unwraps for clarity.")]

    use std::ffi::OsString;
    use std::path::PathBuf;

    use super::default_config_path;
    use super::default_database_path;
    use super::validate_path_string;

    #[test]
    fn validate_path_string_accepts_valid_path() {
        assert!(validate_path_string("test_path", "/var/lib/bedup/db.sqlite").is_ok());
    }

    #[test]
    fn validate_path_string_rejects_empty_string() {
        let result = validate_path_string("test_path", "  ");
        assert!(result.unwrap_err().to_string().contains("non-empty"));
    }

    #[test]
    fn validate_path_string_rejects_long_component() {
        let value = format!("/tmp/{}", "a".repeat(256));
        let result = validate_path_string("test_path", &value);
        assert!(result.unwrap_err().to_string().contains("component too long"));
    }

    #[test]
    fn xdg_variables_win_over_home() {
        assert_eq!(
            default_config_path(Some(OsString::from("/xdg/config")), Some(OsString::from("/home/u"))),
            Some(PathBuf::from("/xdg/config/bedup/bedup.toml"))
        );
        assert_eq!(
            default_database_path(None, Some(OsString::from("/home/u"))),
            Some(PathBuf::from("/home/u/.local/share/bedup/db.sqlite"))
        );
    }

    #[test]
    fn relative_xdg_variables_are_ignored() {
        assert_eq!(
            default_database_path(Some(OsString::from("relative")), Some(OsString::from("/home/u"))),
            Some(PathBuf::from("/home/u/.local/share/bedup/db.sqlite"))
        );
        assert_eq!(default_config_path(Some(OsString::from("relative")), None), None);
    }
}
