//! Crate-wide error type.
//!
//! Struct-like variants carry enough context (file name, offending
//! condition, numeric thresholds) to produce informative user-visible
//! messages, backed by a hand-written [`std::fmt::Display`] rather than a
//! derive-macro error crate.

use serde::Serialize;
use std::fmt;

/// Errors surfaced by the flow codec, loader, role engine, and HPG codec.
///
/// Variant groups fall into five categories: `input`, `format-corrupted`,
/// `invariant-violation`, `resource`, `cancelled`.
#[derive(Debug, Clone, Serialize)]
pub enum HapError {
    /// The input file was empty (zero-byte inflated body).
    EmptyInput { file: String },
    /// The gzip member's ID1/ID2/CM bytes did not match `0x1F 0x8B 0x08`.
    BadGzipMagic { file: String },
    /// The uncompressed body's size was not a multiple of the record size.
    SizeNotMultiple {
        file: String,
        size: u64,
        record_size: usize,
    },
    /// A record's `magic` byte did not match any known flow format version.
    BadRecordMagic { file: String, offset: u64, magic: u8 },
    /// Fewer bytes were available than a complete record requires.
    ShortRead {
        file: String,
        offset: u64,
        expected: usize,
        available: usize,
    },
    /// Trailing bytes remained after the expected record count was read.
    FormatCorrupted { file: String, detail: String },
    /// The gzip member claims a format version this codec cannot read.
    FormatUnsupported { file: String, detail: String },
    /// A debug-fatal internal invariant was violated; in release builds
    /// this is returned instead of panicking.
    InvariantViolation { context: String },
    /// Filesystem or allocation failure underlying an operation.
    Resource { detail: String },
    /// The operation was cancelled cooperatively; partial output was
    /// discarded by the caller.
    Cancelled,
    /// Wraps an [`std::io::Error`] encountered by the codec.
    Io { detail: String },
}

impl fmt::Display for HapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HapError::EmptyInput { file } => write!(f, "{}: empty input file", file),
            HapError::BadGzipMagic { file } => {
                write!(f, "{}: not a gzip file (bad ID1/ID2/CM)", file)
            }
            HapError::SizeNotMultiple {
                file,
                size,
                record_size,
            } => write!(
                f,
                "{}: inflated size {} is not a multiple of the record size {}",
                file, size, record_size
            ),
            HapError::BadRecordMagic { file, offset, magic } => write!(
                f,
                "{}: unrecognized record magic {} at offset {}",
                file, magic, offset
            ),
            HapError::ShortRead {
                file,
                offset,
                expected,
                available,
            } => write!(
                f,
                "{}: short read at offset {}: expected {} bytes, got {}",
                file, offset, expected, available
            ),
            HapError::FormatCorrupted { file, detail } => {
                write!(f, "{}: format corrupted: {}", file, detail)
            }
            HapError::FormatUnsupported { file, detail } => {
                write!(f, "{}: unsupported format: {}", file, detail)
            }
            HapError::InvariantViolation { context } => {
                write!(f, "invariant violation: {}", context)
            }
            HapError::Resource { detail } => write!(f, "resource error: {}", detail),
            HapError::Cancelled => write!(f, "operation cancelled"),
            HapError::Io { detail } => write!(f, "I/O error: {}", detail),
        }
    }
}

impl std::error::Error for HapError {}

impl From<std::io::Error> for HapError {
    fn from(e: std::io::Error) -> Self {
        HapError::Io {
            detail: e.to_string(),
        }
    }
}

/// Raises a debug-fatal invariant violation: panics via `debug_assert!` in
/// debug builds, logs and returns the error in release builds.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $context:expr) => {
        if !$cond {
            debug_assert!($cond, "{}", $context);
            log::error!("invariant violation: {}", $context);
            return Err($crate::error::HapError::InvariantViolation {
                context: $context.to_string(),
            });
        }
    };
}

pub type Result<T> = std::result::Result<T, HapError>;
