//! Binary log format (.ttdlog)
//!
//! A fixed header followed by one length-prefixed body. The body holds every
//! entry, the pinned property records and scripts, and the snapshots, encoded
//! with bincode and optionally LZ4 compressed.
//!
//! # File Structure
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ Header (24 bytes)                              │
//! │ ├─ magic: [u8; 4] = "TTDL"                     │
//! │ ├─ version: u16                                │
//! │ ├─ flags: u16                                  │
//! │ ├─ entry_count: u64                            │
//! │ └─ last_event_time: i64                        │
//! ├────────────────────────────────────────────────┤
//! │ Body length: u32                               │
//! │ Body: bincode(LogBody), LZ4 if COMPRESSED      │
//! └────────────────────────────────────────────────┘
//! ```

mod reader;
mod writer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventLogEntry;
use crate::log::{PropertyRecord, TopLevelScript};
use crate::snapshot::Snapshot;

pub use reader::LogReader;
pub use writer::LogWriter;

/// File magic
pub const LOG_MAGIC: [u8; 4] = *b"TTDL";

/// Current format version
pub const LOG_VERSION: u16 = 1;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 24;

bitflags::bitflags! {
    /// Log feature flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogFlags: u16 {
        /// Body is LZ4 compressed with its size prepended
        const COMPRESSED = 0b0000_0001;
    }
}

/// Fixed-size file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub flags: LogFlags,
    /// Number of entries in the body
    pub entry_count: u64,
    /// Last event time assigned while recording, -1 for an empty log
    pub last_event_time: i64,
}

impl Default for LogHeader {
    fn default() -> Self {
        Self {
            magic: LOG_MAGIC,
            version: LOG_VERSION,
            flags: LogFlags::empty(),
            entry_count: 0,
            last_event_time: -1,
        }
    }
}

/// Everything a log file carries besides the header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBody {
    pub property_records: Vec<PropertyRecord>,
    pub top_level_scripts: Vec<TopLevelScript>,
    pub snapshots: Vec<Snapshot>,
    pub entries: Vec<EventLogEntry>,
}

/// Error reading or writing a log file
#[derive(Debug, Error)]
pub enum LogFormatError {
    #[error("not a time travel log (magic {0:?})")]
    BadMagic([u8; 4]),

    #[error("unsupported log version {0} (expected {expected})", expected = LOG_VERSION)]
    UnsupportedVersion(u16),

    #[error("failed to encode log body: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode log body: {0}")]
    Decode(#[source] bincode::Error),

    #[error("log body too large: {0} bytes")]
    BodyTooLarge(usize),

    #[error("failed to decompress log body: {0}")]
    Compression(#[from] lz4_flex::block::DecompressError),

    #[error("header declares {header} entries but body has {body}")]
    EntryCountMismatch { header: u64, body: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
