// crates/bedup-core/src/runtime/freeze.rs
// ============================================================================
// Module: bedup Freeze Guard
// Description: Immutable-flag guard over a set of open files.
// Purpose: Keep files from changing between verification and cloning.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! Files are made immutable before they are hashed and compared, and restored
//! afterwards. Files that were already immutable are left so. The guard
//! restores on drop, so an early return or a failed comparison never leaves a
//! file frozen; call [`FrozenFiles::thaw`] to observe restore errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;

use crate::interfaces::DedupFile;

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Open files held immutable for the lifetime of the guard.
pub struct FrozenFiles {
    /// Frozen files.
    files: Vec<Box<dyn DedupFile>>,
    /// Whether each file was immutable before freezing.
    was_immutable: Vec<bool>,
    /// Set once the flags have been restored.
    thawed: bool,
}

impl FrozenFiles {
    /// Sets the immutable flag on every file.
    ///
    /// # Errors
    ///
    /// Returns the first flag error; files frozen before it are restored.
    pub fn freeze(files: Vec<Box<dyn DedupFile>>) -> io::Result<Self> {
        let mut was_immutable = Vec::with_capacity(files.len());
        for file in &files {
            match file.set_immutable(true) {
                Ok(previous) => was_immutable.push(previous),
                Err(err) => {
                    let _ = restore(&files, &was_immutable);
                    return Err(err);
                }
            }
        }
        Ok(Self {
            files,
            was_immutable,
            thawed: false,
        })
    }

    /// Returns the frozen files.
    #[must_use]
    pub fn files(&self) -> &[Box<dyn DedupFile>] {
        &self.files
    }

    /// Returns one frozen file.
    #[must_use]
    pub fn file(&self, index: usize) -> Option<&dyn DedupFile> {
        self.files.get(index).map(AsRef::as_ref)
    }

    /// Restores the previous flags and hands the files back.
    ///
    /// # Errors
    ///
    /// Returns the first restore error; every file is still attempted.
    pub fn thaw(mut self) -> io::Result<Vec<Box<dyn DedupFile>>> {
        self.thawed = true;
        restore(&self.files, &self.was_immutable)?;
        Ok(std::mem::take(&mut self.files))
    }
}

impl Drop for FrozenFiles {
    fn drop(&mut self) {
        if !self.thawed {
            let _ = restore(&self.files, &self.was_immutable);
        }
    }
}

/// Clears the flag on files that were not immutable before; returns the
/// first error after attempting every file.
fn restore(files: &[Box<dyn DedupFile>], was_immutable: &[bool]) -> io::Result<()> {
    let mut first_error = None;
    for (file, previous) in files.iter().zip(was_immutable) {
        if *previous {
            continue;
        }
        if let Err(err) = file.set_immutable(false)
            && first_error.is_none()
        {
            first_error = Some(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}
