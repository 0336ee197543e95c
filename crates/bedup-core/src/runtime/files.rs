// crates/bedup-core/src/runtime/files.rs
// ============================================================================
// Module: bedup Explicit File Dedup
// Description: Deduplication of files named by the user.
// Purpose: Clone the first file onto the others after verification.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Unlike a tracked pass, explicit dedup does not skip anything quietly: the
//! files must all be openable, have the same size and contents, and nobody
//! else may be writing to them. Any violation is an error. The tracking
//! database is not touched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use crate::core::Notice;
use crate::core::NoticeKind;
use crate::interfaces::CloneOutcome;
use crate::interfaces::DedupFile;
use crate::interfaces::NoticeSink;
use crate::interfaces::VolumeBackend;
use crate::runtime::content::files_equal;
use crate::runtime::dedup::DedupError;
use crate::runtime::freeze::FrozenFiles;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of an explicit dedup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDedupReport {
    /// Source every destination was compared against.
    pub source: PathBuf,
    /// Destinations cloned.
    pub cloned: Vec<PathBuf>,
    /// Destinations that already shared the source's extents.
    pub already_shared: Vec<PathBuf>,
}

// ============================================================================
// SECTION: Operation
// ============================================================================

/// Clones the first path onto every other path.
///
/// # Errors
///
/// Returns [`DedupError`] when fewer than two paths are given, a file cannot
/// be opened or frozen, another process writes to one of them, or the files
/// differ in size or contents.
pub fn dedup_files<B: VolumeBackend + ?Sized>(
    backend: &B,
    sink: &dyn NoticeSink,
    paths: &[PathBuf],
    defragment_source: bool,
) -> Result<FileDedupReport, DedupError> {
    if paths.len() < 2 {
        return Err(DedupError::TooFewFiles(paths.len()));
    }
    let mut files: Vec<Box<dyn DedupFile>> = Vec::with_capacity(paths.len());
    for path in paths {
        let file = backend.open_path_rw(path).map_err(|err| DedupError::io("open", path, err))?;
        files.push(file);
    }

    let frozen = FrozenFiles::freeze(files).map_err(|err| DedupError::io("freeze", first(paths), err))?;
    let writers = backend
        .writers_among(frozen.files())
        .map_err(|err| DedupError::io("list writers of", Path::new("/proc"), err))?;
    if let Some(index) = writers.first()
        && let Some(path) = paths.get(*index)
    {
        return Err(DedupError::InUse {
            path: path.display().to_string(),
        });
    }

    let mut sizes = Vec::with_capacity(paths.len());
    for (file, path) in frozen.files().iter().zip(paths) {
        let identity = file.identity().map_err(|err| DedupError::io("stat", path, err))?;
        sizes.push(identity.size);
    }
    if let Some(index) = sizes.iter().position(|size| Some(size) != sizes.first())
        && let Some(path) = paths.get(index)
    {
        return Err(DedupError::SizeMismatch {
            path: path.display().to_string(),
        });
    }

    let source_path = first(paths);
    let mut report = FileDedupReport {
        source: source_path.to_path_buf(),
        ..FileDedupReport::default()
    };
    let Some(source) = frozen.file(0) else {
        return Ok(report);
    };
    if defragment_source {
        backend.defragment(source).map_err(|err| DedupError::io("defragment", source_path, err))?;
    }
    for (dest, dest_path) in frozen.files().iter().zip(paths).skip(1) {
        let equal = files_equal(source, dest.as_ref()).map_err(|err| DedupError::io("compare", dest_path, err))?;
        if !equal {
            sink.notify(&Notice::new(NoticeKind::FilesDiffer {
                source: source_path.to_path_buf(),
                dest: dest_path.clone(),
            }));
            return Err(DedupError::ContentMismatch {
                source_path: source_path.display().to_string(),
                dest_path: dest_path.display().to_string(),
            });
        }
        let outcome = backend
            .clone_file(dest.as_ref(), source)
            .map_err(|err| DedupError::io("clone onto", dest_path, err))?;
        match outcome {
            CloneOutcome::Cloned => {
                sink.notify(&Notice::new(NoticeKind::Deduplicated {
                    source: source_path.to_path_buf(),
                    dest: dest_path.clone(),
                }));
                report.cloned.push(dest_path.clone());
            }
            CloneOutcome::AlreadyShared => {
                sink.notify(&Notice::new(NoticeKind::AlreadyDeduplicated {
                    source: source_path.to_path_buf(),
                    dest: dest_path.clone(),
                }));
                report.already_shared.push(dest_path.clone());
            }
        }
    }
    frozen.thaw().map_err(|err| DedupError::io("unfreeze", source_path, err))?;
    Ok(report)
}

/// Returns the first path, or the empty path.
fn first(paths: &[PathBuf]) -> &Path {
    paths.first().map_or_else(|| Path::new(""), PathBuf::as_path)
}
