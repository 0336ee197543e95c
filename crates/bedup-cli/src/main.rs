// crates/bedup-cli/src/main.rs
// ============================================================================
// Module: bedup CLI Entry Point
// Description: Command dispatcher for btrfs volume tracking and deduplication.
// Purpose: Provide a localized CLI over the tracking database and btrfs layer.
// Dependencies: clap, bedup-btrfs, bedup-config, bedup-core, bedup-store-sqlite
// ============================================================================

//! ## Overview
//! The bedup CLI scans btrfs volumes into the tracking database, deduplicates
//! tracked files per filesystem, and reports on volumes and past dedup
//! events. All user-facing strings are routed through the i18n catalog;
//! progress notices go to the configured notice sinks.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use bedup_btrfs::BtrfsBackend;
use bedup_btrfs::list_btrfs_devices;
use bedup_btrfs::read_mountinfo;
use bedup_btrfs::subvolume_root_id;
use bedup_cli::t;
use bedup_cli::volumes::DeviceListing;
use bedup_cli::volumes::render_volumes;
use bedup_config::BedupConfig;
use bedup_core::InMemoryTrackingStore;
use bedup_core::JsonLinesNoticeSink;
use bedup_core::NoticeFormat;
use bedup_core::NoticeSink;
use bedup_core::StderrNoticeSink;
use bedup_core::TeeNoticeSink;
use bedup_core::TrackingStore;
use bedup_core::VolumeBackend;
use bedup_core::VolumeId;
use bedup_core::VolumeRegistry;
use bedup_core::dedup_files;
use bedup_core::dedup_tracked;
use bedup_core::find_new;
use bedup_core::forget_volume;
use bedup_core::register_volume;
use bedup_core::track_updated_files;
use bedup_store_sqlite::SqliteTrackingStore;
use clap::ArgAction;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default number of events listed by `log`.
const DEFAULT_LOG_LIMIT: usize = 50;
/// Mount table of this process.
const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "bedup", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Config file path (overrides `BEDUP_CONFIG` and the XDG location).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Tracking database path (overrides `[database] path`).
    #[arg(long = "db-path", value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,
    /// Rendering of progress notices on stderr (overrides `[notices] format`).
    #[arg(long = "notice-format", value_enum, value_name = "FORMAT", global = true)]
    notice_format: Option<NoticeFormatArg>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan volumes and track files updated since the last scan.
    ScanVol(ScanVolCommand),
    /// Scan volumes, then deduplicate their tracked files.
    DedupVol(DedupVolCommand),
    /// Forget the tracked files of volumes.
    ResetVol(ResetVolCommand),
    /// List btrfs devices, their tracked volumes, and mount points.
    ShowVols,
    /// Clone a source file onto identical destination files.
    DedupFiles(DedupFilesCommand),
    /// List regular files changed since a generation.
    FindNew(FindNewCommand),
    /// Print the current generation of a volume.
    Generation(GenerationCommand),
    /// List logged dedup events, newest first.
    Log(LogCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a bedup configuration file.
    Validate,
}

/// Arguments for `scan-vol`.
#[derive(Args, Debug)]
struct ScanVolCommand {
    /// Volumes to scan.
    #[arg(value_name = "VOLUME", required = true)]
    volumes: Vec<PathBuf>,
    /// Ignore files smaller than this many bytes (stored per volume).
    #[arg(long = "size-cutoff", value_name = "BYTES")]
    size_cutoff: Option<u64>,
}

/// Arguments for `dedup-vol`.
#[derive(Args, Debug)]
struct DedupVolCommand {
    /// Volumes to scan and deduplicate.
    #[arg(value_name = "VOLUME", required = true)]
    volumes: Vec<PathBuf>,
    /// Ignore files smaller than this many bytes (stored per volume).
    #[arg(long = "size-cutoff", value_name = "BYTES")]
    size_cutoff: Option<u64>,
    /// Defragment each clone source first.
    #[arg(long)]
    defrag: bool,
}

/// Arguments for `reset-vol`.
#[derive(Args, Debug)]
struct ResetVolCommand {
    /// Volumes to reset.
    #[arg(value_name = "VOLUME", required = true)]
    volumes: Vec<PathBuf>,
}

/// Arguments for `dedup-files`.
#[derive(Args, Debug)]
struct DedupFilesCommand {
    /// File whose extents are kept.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Files cloned onto the source.
    #[arg(value_name = "DEST", required = true)]
    dests: Vec<PathBuf>,
    /// Defragment the source first.
    #[arg(long)]
    defrag: bool,
}

/// Arguments for `find-new`.
#[derive(Args, Debug)]
struct FindNewCommand {
    /// Volume to search.
    #[arg(value_name = "VOLUME")]
    volume: PathBuf,
    /// Oldest generation to list.
    #[arg(value_name = "GENERATION")]
    generation: u64,
}

/// Arguments for `generation`.
#[derive(Args, Debug)]
struct GenerationCommand {
    /// Volume to query.
    #[arg(value_name = "VOLUME")]
    volume: PathBuf,
}

/// Arguments for `log`.
#[derive(Args, Debug)]
struct LogCommand {
    /// Maximum number of events to list.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_LOG_LIMIT)]
    limit: usize,
}

/// Notice rendering selected on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum NoticeFormatArg {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl From<NoticeFormatArg> for NoticeFormat {
    fn from(value: NoticeFormatArg) -> Self {
        match value {
            NoticeFormatArg::Text => Self::Text,
            NoticeFormatArg::Json => Self::Json,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for localized error messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a localized message.
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&t!("main.version", version = version))?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        show_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    let config = BedupConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(t!("config.load_failed", error = err)))?;
    let globals = Globals {
        config,
        db_path: cli.db_path,
        notice_format: cli.notice_format.map(NoticeFormat::from),
    };

    match command {
        Commands::ScanVol(command) => command_scan_vol(&globals, &command),
        Commands::DedupVol(command) => command_dedup_vol(&globals, &command),
        Commands::ResetVol(command) => command_reset_vol(&globals, &command),
        Commands::ShowVols => command_show_vols(&globals),
        Commands::DedupFiles(command) => command_dedup_files(&globals, &command),
        Commands::FindNew(command) => command_find_new(&globals, &command),
        Commands::Generation(command) => command_generation(&globals, &command),
        Commands::Log(command) => command_log(&globals, &command),
        Commands::Config {
            command,
        } => command_config(&globals, &command),
    }
}

/// Emits the top-level help message for the CLI.
fn show_help() -> CliResult<()> {
    let mut command = Cli::command();
    command.print_help().map_err(|err| CliError::new(output_error("stdout", &err)))?;
    write_stdout_line("")
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Settings shared by every command.
struct Globals {
    /// Loaded configuration.
    config: BedupConfig,
    /// Database path override.
    db_path: Option<PathBuf>,
    /// Notice format override.
    notice_format: Option<NoticeFormat>,
}

impl Globals {
    /// Opens the tracking database.
    fn open_store(&self) -> CliResult<SqliteTrackingStore> {
        let store_config = self
            .config
            .store_config(self.db_path.as_deref())
            .map_err(|err| CliError::new(t!("config.load_failed", error = err)))?;
        let path = store_config.path.clone();
        SqliteTrackingStore::new(store_config).map_err(|err| {
            CliError::new(t!("store.open_failed", path = path.display(), error = err))
        })
    }

    /// Builds the notice sink: stderr, plus the JSON-lines log when one is
    /// configured.
    fn notice_sink(&self) -> CliResult<Box<dyn NoticeSink>> {
        let format = self.notice_format.unwrap_or(self.config.notices.format);
        let stderr: Box<dyn NoticeSink> = Box::new(StderrNoticeSink::new(format));
        let Some(path) = &self.config.notices.path else {
            return Ok(stderr);
        };
        let log: Box<dyn NoticeSink> =
            Box::new(JsonLinesNoticeSink::new(path).map_err(|err| {
                CliError::new(t!("notices.open_failed", path = path.display(), error = err))
            })?);
        Ok(Box::new(TeeNoticeSink::new(vec![stderr, log])))
    }
}

/// Opens every path as a volume and registers it.
fn register_all<S: TrackingStore + ?Sized>(
    store: &S,
    backend: &mut BtrfsBackend,
    registry: &mut VolumeRegistry,
    paths: &[PathBuf],
    size_cutoff: Option<u64>,
    default_size_cutoff: u64,
) -> CliResult<Vec<VolumeId>> {
    paths
        .iter()
        .map(|path| {
            register_volume(store, backend, registry, path, size_cutoff, default_size_cutoff).map_err(
                |err| CliError::new(t!("volume.open_failed", path = path.display(), error = err)),
            )
        })
        .collect()
}

/// Scans every registered volume in registration order.
fn scan_all(
    store: &SqliteTrackingStore,
    backend: &BtrfsBackend,
    sink: &dyn NoticeSink,
    registry: &mut VolumeRegistry,
) -> CliResult<()> {
    let ids = registry.ids().to_vec();
    for id in ids {
        let Some(volume) = registry.get_mut(id) else {
            continue;
        };
        track_updated_files(store, backend, sink, volume).map_err(|err| {
            CliError::new(t!("scan.failed", volume = volume.desc.display(), error = err))
        })?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Tracking Commands
// ============================================================================

/// Executes `scan-vol`.
fn command_scan_vol(globals: &Globals, command: &ScanVolCommand) -> CliResult<ExitCode> {
    let store = globals.open_store()?;
    let sink = globals.notice_sink()?;
    let mut backend = BtrfsBackend::new();
    let mut registry = VolumeRegistry::new();
    let result = register_all(
        &store,
        &mut backend,
        &mut registry,
        &command.volumes,
        command.size_cutoff,
        globals.config.tracking.default_size_cutoff,
    )
    .and_then(|_| scan_all(&store, &backend, sink.as_ref(), &mut registry));
    registry.close_all(&mut backend);
    result.map(|()| ExitCode::SUCCESS)
}

/// Executes `dedup-vol`: scan, then one dedup pass per filesystem.
fn command_dedup_vol(globals: &Globals, command: &DedupVolCommand) -> CliResult<ExitCode> {
    let store = globals.open_store()?;
    let sink = globals.notice_sink()?;
    let options = globals.config.dedup_options(command.defrag);
    let mut backend = BtrfsBackend::new();
    let mut registry = VolumeRegistry::new();
    let result = register_all(
        &store,
        &mut backend,
        &mut registry,
        &command.volumes,
        command.size_cutoff,
        globals.config.tracking.default_size_cutoff,
    )
    .and_then(|_| scan_all(&store, &backend, sink.as_ref(), &mut registry))
    .and_then(|()| {
        for vol_ids in registry.by_filesystem().values() {
            let report = dedup_tracked(&store, &backend, sink.as_ref(), &registry, vol_ids, options)
                .map_err(|err| CliError::new(t!("dedup.failed", error = err)))?;
            write_stdout_line(&t!(
                "dedup.summary",
                cloned = report.cloned,
                shared = report.already_shared,
                skipped = report.skipped.len(),
                events = report.events.len()
            ))?;
        }
        Ok(())
    });
    registry.close_all(&mut backend);
    result.map(|()| ExitCode::SUCCESS)
}

/// Executes `reset-vol`.
fn command_reset_vol(globals: &Globals, command: &ResetVolCommand) -> CliResult<ExitCode> {
    let store = globals.open_store()?;
    let mut backend = BtrfsBackend::new();
    let mut registry = VolumeRegistry::new();
    let result = register_all(
        &store,
        &mut backend,
        &mut registry,
        &command.volumes,
        None,
        globals.config.tracking.default_size_cutoff,
    )
    .and_then(|ids| {
        for (id, path) in ids.into_iter().zip(&command.volumes) {
            forget_volume(&store, &mut registry, id).map_err(|err| {
                CliError::new(t!("reset.failed", volume = path.display(), error = err))
            })?;
            write_stdout_line(&t!("reset.ok", volume = path.display()))?;
        }
        Ok(())
    });
    registry.close_all(&mut backend);
    result.map(|()| ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Reporting Commands
// ============================================================================

/// Executes `show-vols`.
fn command_show_vols(globals: &Globals) -> CliResult<ExitCode> {
    let store = globals.open_store()?;
    let read_failed = |err: bedup_core::StoreError| CliError::new(t!("store.read_failed", error = err));
    let mut tracked = BTreeMap::new();
    for filesystem in store.filesystems().map_err(read_failed)? {
        let volumes = store.volumes_of(filesystem.id).map_err(read_failed)?;
        tracked.insert(filesystem.uuid, volumes);
    }

    let entries = list_btrfs_devices()
        .map_err(|err| CliError::new(t!("show_vols.devices_failed", error = err)))?;
    let mut mounts = read_mountinfo(Path::new(MOUNTINFO_PATH))
        .map_err(|err| CliError::new(t!("show_vols.mounts_failed", error = err)))?;
    let devices: Vec<DeviceListing> = entries
        .into_iter()
        .map(|entry| {
            let canonical = fs::canonicalize(&entry.device).unwrap_or_else(|_| entry.device.clone());
            DeviceListing {
                mounts: mounts.remove(&canonical).unwrap_or_default(),
                entry,
            }
        })
        .collect();

    for line in render_volumes(&devices, &tracked, subvolume_root_id) {
        write_stdout_line(&line)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `log`.
fn command_log(globals: &Globals, command: &LogCommand) -> CliResult<ExitCode> {
    let store = globals.open_store()?;
    let events = store
        .dedup_events(command.limit)
        .map_err(|err| CliError::new(t!("log.failed", error = err)))?;
    for event in events {
        write_stdout_line(&t!(
            "log.event",
            id = event.id,
            created = event.created,
            size = event.item_size,
            count = event.inode_count,
            gain = event.estimated_space_gain()
        ))?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Direct Commands
// ============================================================================

/// Executes `dedup-files`.
fn command_dedup_files(globals: &Globals, command: &DedupFilesCommand) -> CliResult<ExitCode> {
    let sink = globals.notice_sink()?;
    let backend = BtrfsBackend::new();
    let mut paths = Vec::with_capacity(command.dests.len() + 1);
    paths.push(command.source.clone());
    paths.extend(command.dests.iter().cloned());
    let defragment = globals.config.dedup_options(command.defrag).defragment_source;
    let report = dedup_files(&backend, sink.as_ref(), &paths, defragment).map_err(|err| {
        CliError::new(t!("dedup_files.failed", source = command.source.display(), error = err))
    })?;
    write_stdout_line(&t!(
        "dedup_files.summary",
        cloned = report.cloned.len(),
        source = report.source.display(),
        shared = report.already_shared.len()
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `find-new`. The tracking database is not touched.
fn command_find_new(globals: &Globals, command: &FindNewCommand) -> CliResult<ExitCode> {
    let scratch = InMemoryTrackingStore::new();
    let mut backend = BtrfsBackend::new();
    let mut registry = VolumeRegistry::new();
    let result = register_all(
        &scratch,
        &mut backend,
        &mut registry,
        std::slice::from_ref(&command.volume),
        None,
        globals.config.tracking.default_size_cutoff,
    )
    .and_then(|ids| {
        let Some(volume) = ids.first().and_then(|id| registry.get(*id)) else {
            return Ok(());
        };
        let report = find_new(&backend, volume, command.generation).map_err(|err| {
            CliError::new(t!("find_new.failed", volume = command.volume.display(), error = err))
        })?;
        for path in &report.paths {
            write_stdout_line(&path.display().to_string())?;
        }
        write_stdout_line(&t!("find_new.generation", generation = report.generation))
    });
    registry.close_all(&mut backend);
    result.map(|()| ExitCode::SUCCESS)
}

/// Executes `generation`.
fn command_generation(globals: &Globals, command: &GenerationCommand) -> CliResult<ExitCode> {
    let scratch = InMemoryTrackingStore::new();
    let mut backend = BtrfsBackend::new();
    let mut registry = VolumeRegistry::new();
    let result = register_all(
        &scratch,
        &mut backend,
        &mut registry,
        std::slice::from_ref(&command.volume),
        None,
        globals.config.tracking.default_size_cutoff,
    )
    .and_then(|ids| {
        let Some(volume) = ids.first().and_then(|id| registry.get(*id)) else {
            return Ok(());
        };
        let generation = backend.root_generation(volume.handle).map_err(|err| {
            CliError::new(t!("generation.failed", volume = command.volume.display(), error = err))
        })?;
        write_stdout_line(&t!("generation.value", generation = generation))
    });
    registry.close_all(&mut backend);
    result.map(|()| ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(globals: &Globals, command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate => {
            let message = if globals.config.source.is_some() {
                t!("config.validate.ok")
            } else {
                t!("config.validate.defaults")
            };
            write_stdout_line(&message)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes one line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats a localized output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    let stream_label = match stream {
        "stdout" => t!("output.stream.stdout"),
        "stderr" => t!("output.stream.stderr"),
        _ => t!("output.stream.unknown"),
    };
    t!("output.write_failed", stream = stream_label, error = error)
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
