// crates/bedup-core/src/core/time.rs
// ============================================================================
// Module: bedup Timestamps
// Description: UTC wall-clock timestamps for dedup events and notices.
// Purpose: Store event creation times as unix milliseconds.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Timestamps are always UTC unix milliseconds. They render as RFC 3339
//! date-times; values outside the RFC 3339 year range render as raw
//! milliseconds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use ::time::OffsetDateTime;
use ::time::format_description::well_known::Rfc3339;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// UTC timestamp in unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current system time.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Formats the timestamp as an RFC 3339 UTC date-time, or `None` when it
    /// falls outside the representable range.
    #[must_use]
    pub fn to_rfc3339(self) -> Option<String> {
        let nanos = i128::from(self.0) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?.format(&Rfc3339).ok()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(rendered) => f.write_str(&rendered),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Returns the current unix epoch in milliseconds for notice payloads.
#[must_use]
pub fn unix_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}
