//! # Error Types
//!
//! General error handling for crash reporting.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Nothing in the reporting path escalates these errors: every section of a
//! report catches them and prints a marker instead. They exist so that each
//! layer can say precisely *why* it degraded.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ThreadId;

/// Main error type for postmortem operations
///
/// ## Error Categories
///
/// 1. **Snapshot errors**: SnapshotFailed (thread or module list unavailable)
/// 2. **Thread errors**: ThreadUnavailable, SuspendFailed, ResumeFailed, ContextUnavailable, Timeout
/// 3. **Metadata errors**: SymbolLoadFailed, InvalidImage
/// 4. **Memory errors**: MemoryReadFailed
/// 5. **Platform errors**: Unsupported
/// 6. **I/O errors**: Io (writing the report, reading `/proc`, etc.)
#[derive(Error, Debug)]
pub enum PostmortemError
{
    /// The OS snapshot facility could not list threads or modules
    ///
    /// The string names the snapshot and the underlying reason.
    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    /// A thread from the snapshot could not be opened
    ///
    /// This happens routinely when a thread exits between the snapshot and
    /// the attempt to sample it.
    #[error("Thread {thread_id} unavailable: {details}")]
    ThreadUnavailable
    {
        /// Thread that could not be opened
        thread_id: ThreadId,
        /// Additional error details
        details: String,
    },

    /// Failed to pause a thread for sampling
    #[error("Failed to suspend thread: {0}")]
    SuspendFailed(String),

    /// Failed to let a paused thread continue
    #[error("Failed to resume thread: {0}")]
    ResumeFailed(String),

    /// The register snapshot of a thread could not be retrieved
    ///
    /// The thread is still resumed when this is returned.
    #[error("Failed to read thread context: {details}")]
    ContextUnavailable
    {
        /// Thread ID if the operation was thread-specific
        thread_id: Option<ThreadId>,
        /// Additional error details
        details: String,
    },

    /// A bounded wait expired
    #[error("Timed out after {millis} ms waiting for {operation}")]
    Timeout
    {
        /// Description of what was being waited on
        operation: &'static str,
        /// Budget that expired
        millis: u64,
    },

    /// Debug metadata for a module could not be loaded
    #[error("Error loading symbols {path}: {details}")]
    SymbolLoadFailed
    {
        /// File that was being loaded
        path: PathBuf,
        /// Additional error details
        details: String,
    },

    /// A binary image could not be parsed
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Memory of the process could not be read at the given address
    #[error("Failed to read memory at 0x{address:016x}: {details}")]
    MemoryReadFailed
    {
        /// Address of the failed read
        address: u64,
        /// Additional error details
        details: String,
    },

    /// The operation has no implementation on this platform
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    /// I/O error (report sink, `/proc` files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, PostmortemError>`
///
/// ```rust
/// use postmortem_core::error::PostmortemResult;
/// fn foo() -> PostmortemResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type PostmortemResult<T> = std::result::Result<T, PostmortemError>;
