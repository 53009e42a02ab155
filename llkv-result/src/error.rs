use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all LLKV storage and compaction operations.
///
/// Every fallible operation in the workspace returns [`crate::Result`], so a
/// failure raised deep inside a segment read or a mask-buffer spill travels
/// unchanged up to the compaction task boundary with `?`.
///
/// # Error Handling Strategy
///
/// The variants map onto the outcomes a compaction scheduler has to tell
/// apart:
///
/// - [`Error::Cancelled`]: the job was aborted on purpose; nothing was committed.
/// - [`Error::Io`]: an I/O failure; the scheduler may reschedule a fresh task.
/// - [`Error::ResourceExceeded`]: a memory ceiling was breached; retry with less
///   concurrency or smaller chunks.
/// - [`Error::Internal`] / [`Error::InvalidState`]: a bug. Always terminal.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, so errors produced on pool threads can
/// be handed back to the scheduler thread.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or disk operations.
    ///
    /// This error wraps standard library I/O errors and typically occurs during:
    /// - Creating or writing mask-buffer spill files
    /// - Reading spilled masks back during a later column-group pass
    /// - Flushing buffered data to persistent storage
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    ///
    /// This error occurs when:
    /// - Building chunks from merged source rows
    /// - Concatenating or slicing `RecordBatch`es
    /// - Schema mismatches between a chunk and its column-group projection
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// Examples:
    /// - A rowset id that does not belong to the tablet being compacted
    /// - A schema version that no longer matches the tablet
    /// - An empty column group or a column index outside the schema
    /// - More merge sources than a row source mask can address
    ///
    /// # Recovery
    ///
    /// Fix the input and submit a new task.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Storage key or entity not found.
    ///
    /// Raised when a tablet, a rowset, or a pager blob referenced by metadata is
    /// missing.
    #[error("Storage key not found")]
    NotFound,

    /// Catalog metadata error.
    ///
    /// The persisted tablet catalog or a transaction log could not be decoded.
    /// Catalog errors are serious as they affect the store's understanding of
    /// its own structure.
    #[error("{0}")]
    CatalogError(String),

    /// The operation was cancelled.
    ///
    /// Produced when the background workers are stopped (process shutdown) or
    /// a task-scoped cancellation predicate fires (for example because the
    /// tablet was dropped). Cancellation is terminal for the task and never
    /// leaves a partially committed result behind.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A resource ceiling was exceeded.
    ///
    /// Currently raised when a compaction worker's tracked memory consumption
    /// exceeds its configured limit. The scheduler can react by lowering
    /// concurrency or chunk size on the next attempt.
    #[error("Resource exceeded: {0}")]
    ResourceExceeded(String),

    /// An API was called in an order its state machine does not allow.
    ///
    /// Examples:
    /// - Writing to a row source mask buffer after it was sealed
    /// - Reading a mask buffer before it was sealed
    /// - Writing columns to a tablet writer after `finish`
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error indicating a bug or unexpected state.
    ///
    /// This error should never occur during normal operation. It indicates:
    /// - Violated internal invariants (mask entries produced vs. consumed)
    /// - Column groups that disagree on the number of output rows
    /// - Data structure corruption
    ///
    /// # Debugging
    ///
    /// The message includes details about what assertion failed. Enable debug
    /// logging (`RUST_LOG=debug`) for more context.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error from any displayable error.
    ///
    /// This is a convenience method for converting foreign error types (such as
    /// Parquet errors) into [`Error::Internal`] while preserving the original
    /// message.
    ///
    /// # Examples
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// fn parse_count(input: &str) -> Result<u32, Error> {
    ///     input.parse::<u32>().map_err(Error::internal)
    /// }
    ///
    /// assert_eq!(parse_count("42").unwrap(), 42);
    /// assert!(matches!(parse_count("abc"), Err(Error::Internal(_))));
    /// ```
    #[inline]
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        Error::Internal(err.to_string())
    }

    /// Create a cancellation error with the given reason.
    #[inline]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Error::Cancelled(reason.into())
    }

    /// Returns `true` when the error represents a cancellation rather than a
    /// failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// assert!(Error::cancelled("background worker stopped").is_cancelled());
    /// assert!(!Error::NotFound.is_cancelled());
    /// ```
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
