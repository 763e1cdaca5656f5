//! Error types for convert-queue
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error variants for each conversion failure class
//! - Classification into [`ConversionErrorKind`](crate::types::ConversionErrorKind)
//!   (see [`crate::recovery`]) that drives the retry policy
//! - Context information (task ID, file ID, elapsed time, etc.)

use crate::types::TaskId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for convert-queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for convert-queue
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Input document failed validation
    #[error("input validation error: {0}")]
    InputValidation(String),

    /// Requested conversion format is invalid or unsupported
    #[error("format validation error: {0}")]
    FormatValidation(String),

    /// The conversion tool failed
    #[error("converter error: {0}")]
    Converter(String),

    /// File could not be read or written
    #[error("file system error: {0}")]
    FileSystem(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Access to a file or resource was denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Conversion exceeded its time budget
    #[error("conversion timed out after {elapsed:?}")]
    Timeout {
        /// How long the conversion ran before being aborted
        elapsed: Duration,
    },

    /// Conversion ran out of memory
    #[error("memory error: {0}")]
    Memory(String),

    /// A network dependency failed
    #[error("network error: {0}")]
    Network(String),

    /// Task not found in the queue, active set, or history
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A conversion for the same input file is already queued or running
    #[error("duplicate conversion: file {file_id} already in queue")]
    DuplicateFile {
        /// The input file that is already being converted
        file_id: String,
    },

    /// Cannot perform operation in the task's current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task that is in an invalid state for the operation
        id: TaskId,
        /// The operation that was attempted (e.g., "retry", "cancel")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_tasks")
        key: Option<String>,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}
