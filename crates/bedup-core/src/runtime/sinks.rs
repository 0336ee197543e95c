// crates/bedup-core/src/runtime/sinks.rs
// ============================================================================
// Module: bedup Notice Sinks
// Description: Stderr, JSON-lines file, no-op, and collecting notice sinks.
// Purpose: Route scan and dedup notices to the chosen output.
// Dependencies: serde, serde_json, crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`NoticeSink`] implementations. The stderr sink renders text or JSON, the
//! JSON-lines sink appends one record per notice to a file, and the tee sink
//! fans out to several sinks in order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::core::Notice;
use crate::interfaces::NoticeSink;

// ============================================================================
// SECTION: Formats
// ============================================================================

/// Rendering of notices written to a terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Notice sink writing to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrNoticeSink {
    /// Output rendering.
    format: NoticeFormat,
}

impl StderrNoticeSink {
    /// Creates a stderr sink with the given rendering.
    #[must_use]
    pub const fn new(format: NoticeFormat) -> Self {
        Self {
            format,
        }
    }
}

impl NoticeSink for StderrNoticeSink {
    fn notify(&self, notice: &Notice) {
        match self.format {
            NoticeFormat::Text => {
                let _ = writeln!(std::io::stderr(), "{notice}");
            }
            NoticeFormat::Json => {
                if let Ok(payload) = serde_json::to_string(notice) {
                    let _ = writeln!(std::io::stderr(), "{payload}");
                }
            }
        }
    }
}

/// Notice sink appending JSON lines to a file.
pub struct JsonLinesNoticeSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl JsonLinesNoticeSink {
    /// Opens the notice log in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl NoticeSink for JsonLinesNoticeSink {
    fn notify(&self, notice: &Notice) {
        if let Ok(payload) = serde_json::to_string(notice)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Notice sink forwarding to several sinks in order.
pub struct TeeNoticeSink {
    /// Downstream sinks.
    sinks: Vec<Box<dyn NoticeSink>>,
}

impl TeeNoticeSink {
    /// Creates a sink forwarding to every given sink.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn NoticeSink>>) -> Self {
        Self {
            sinks,
        }
    }
}

impl NoticeSink for TeeNoticeSink {
    fn notify(&self, notice: &Notice) {
        for sink in &self.sinks {
            sink.notify(notice);
        }
    }
}

/// No-op notice sink.
pub struct NoopNoticeSink;

impl NoticeSink for NoopNoticeSink {
    fn notify(&self, _notice: &Notice) {}
}

/// Notice sink keeping every notice in memory.
#[derive(Debug, Default)]
pub struct CollectingNoticeSink {
    /// Recorded notices.
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNoticeSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded notices.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|notices| notices.clone()).unwrap_or_default()
    }
}

impl NoticeSink for CollectingNoticeSink {
    fn notify(&self, notice: &Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
    }
}
