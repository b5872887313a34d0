//! Error types for media-dl.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the runner and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation is already in flight; the runner accepts one at a time.
    #[error("an operation is already in progress")]
    Busy,

    /// The source URL failed validation or is not a supported media page.
    #[error("invalid source URL: {0}")]
    InvalidSource(String),

    /// The destination directory does not exist or is not writable.
    #[error("invalid destination directory: {0}")]
    InvalidDestination(String),

    /// A required external tool could not be found on this system.
    #[error("missing external dependency: {0}")]
    MissingDependency(String),

    /// The media backend failed while resolving or transferring.
    #[error("download failed: {0}")]
    Download(String),

    /// The conversion tool failed or produced no output.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// A filesystem operation failed (staging, moving, cleanup).
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation observed its cancellation token and stopped early.
    /// Never surfaced to callers; the worker turns it into a
    /// [`ProgressEvent::Cancelled`](crate::types::ProgressEvent::Cancelled).
    #[error("operation cancelled")]
    Cancelled,

    /// Anything that does not fit the categories above.
    #[error("{0}")]
    Unexpected(String),
}

/// Coarse failure category carried on terminal `Failed` events.
///
/// Observers branch on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Another operation already holds the single-flight slot.
    Busy,
    /// The source URL was rejected.
    InvalidSource,
    /// The destination directory was rejected.
    InvalidDestination,
    /// An external tool is not installed.
    MissingDependency,
    /// The transfer itself failed.
    Download,
    /// Post-transfer conversion failed.
    Conversion,
    /// A filesystem operation failed.
    Filesystem,
    /// Uncategorized failure.
    Unexpected,
}

impl Error {
    /// Maps this error onto the category reported to observers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Busy => ErrorKind::Busy,
            Error::InvalidSource(_) => ErrorKind::InvalidSource,
            Error::InvalidDestination(_) => ErrorKind::InvalidDestination,
            Error::MissingDependency(_) => ErrorKind::MissingDependency,
            Error::Download(_) => ErrorKind::Download,
            Error::Conversion(_) => ErrorKind::Conversion,
            Error::Filesystem(_) | Error::Io(_) => ErrorKind::Filesystem,
            // Cancellation is reported as its own terminal event, not as a
            // failure; this arm only matters if a caller maps it anyway.
            Error::Cancelled => ErrorKind::Unexpected,
            Error::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Busy => "busy",
            ErrorKind::InvalidSource => "invalid_source",
            ErrorKind::InvalidDestination => "invalid_destination",
            ErrorKind::MissingDependency => "missing_dependency",
            ErrorKind::Download => "download",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{name}")
    }
}
