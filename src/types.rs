//! Core data types shared across the crate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Unique identifier for a single operation within one runner instance.
///
/// Identifiers are allocated monotonically and never reused, so a handle
/// kept past its operation's end can always be told apart from the
/// currently active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OperationId {
    fn from(value: u64) -> Self {
        OperationId(value)
    }
}

impl From<OperationId> for u64 {
    fn from(value: OperationId) -> Self {
        value.0
    }
}

/// Opaque token returned by [`start`](crate::runner::OperationRunner::start),
/// used to request cancellation of that specific operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    id: OperationId,
}

impl OperationHandle {
    pub(crate) fn new(id: OperationId) -> Self {
        OperationHandle { id }
    }

    /// The identifier of the operation this handle refers to.
    pub fn id(&self) -> OperationId {
        self.id
    }
}

/// Target container for video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    /// MPEG-4 container.
    Mp4,
    /// Matroska container.
    Mkv,
    /// WebM container.
    Webm,
}

impl Container {
    /// File extension for this container, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
        }
    }
}

/// What the caller wants produced from the source media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSpec {
    /// Audio-only, extracted to MP3.
    Audio,
    /// Full video in the requested container.
    Video {
        /// Container to mux into.
        container: Container,
    },
}

impl OutputSpec {
    /// File extension the finished artifact will carry.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputSpec::Audio => "mp3",
            OutputSpec::Video { container } => container.extension(),
        }
    }
}

impl Default for OutputSpec {
    fn default() -> Self {
        OutputSpec::Video {
            container: Container::Mp4,
        }
    }
}

/// Everything needed to start one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Source media page URL.
    pub source: String,
    /// Directory the finished artifact is moved into.
    pub dest_dir: PathBuf,
    /// Desired output format.
    #[serde(default)]
    pub output: OutputSpec,
    /// Optional file name (without extension) overriding the media title.
    #[serde(default)]
    pub filename_override: Option<String>,
}

/// One available format reported by the media backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Backend-assigned format identifier.
    pub id: String,
    /// Container/extension of this format.
    pub ext: String,
    /// Vertical resolution, when the format carries video.
    pub height: Option<u32>,
    /// Size in bytes, when the backend knows it up front.
    pub filesize: Option<u64>,
    /// True when the format carries no video stream.
    pub audio_only: bool,
}

/// Metadata resolved for a source URL before transfer begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Human-readable media title.
    pub title: String,
    /// Duration in seconds, when known.
    pub duration_seconds: Option<u64>,
    /// Channel or uploader name, when known.
    pub uploader: Option<String>,
    /// Canonical page URL.
    pub webpage_url: String,
    /// Formats offered by the backend for this media.
    pub formats: Vec<FormatDescriptor>,
}

/// Pipeline phase an active operation is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Accepted, not yet resolving.
    Queued,
    /// Resolving source metadata.
    Resolving,
    /// Transferring bytes.
    Transferring,
    /// Converting or moving the artifact.
    Finalizing,
}

/// Progress and lifecycle events emitted by the runner.
///
/// Every started operation emits events in a fixed order and ends with
/// exactly one terminal event ([`Completed`](ProgressEvent::Completed),
/// [`Cancelled`](ProgressEvent::Cancelled) or
/// [`Failed`](ProgressEvent::Failed)); no events for that operation follow
/// its terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The operation was accepted and handed to the worker.
    Queued {
        /// Operation this event belongs to.
        id: OperationId,
    },
    /// Metadata resolution is in progress.
    Resolving {
        /// Operation this event belongs to.
        id: OperationId,
    },
    /// Bytes are moving.
    Transferring {
        /// Operation this event belongs to.
        id: OperationId,
        /// Bytes transferred so far.
        bytes_done: u64,
        /// Total size when the backend knows it.
        bytes_total: Option<u64>,
        /// Current transfer rate in bytes per second, when known.
        rate_bps: Option<u64>,
        /// Estimated seconds remaining, when known.
        eta_seconds: Option<u64>,
        /// Whole-number completion percentage; absent when the total
        /// size is unknown.
        percent: Option<u8>,
    },
    /// Post-transfer conversion or muxing is in progress.
    Finalizing {
        /// Operation this event belongs to.
        id: OperationId,
    },
    /// Terminal: the finished artifact is in place.
    Completed {
        /// Operation this event belongs to.
        id: OperationId,
        /// Final location of the artifact.
        output_path: PathBuf,
    },
    /// Terminal: the operation stopped at the caller's request.
    Cancelled {
        /// Operation this event belongs to.
        id: OperationId,
    },
    /// Terminal: the operation failed.
    Failed {
        /// Operation this event belongs to.
        id: OperationId,
        /// Failure category for observers to branch on.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl ProgressEvent {
    /// The operation this event belongs to.
    pub fn id(&self) -> OperationId {
        match self {
            ProgressEvent::Queued { id }
            | ProgressEvent::Resolving { id }
            | ProgressEvent::Transferring { id, .. }
            | ProgressEvent::Finalizing { id }
            | ProgressEvent::Completed { id, .. }
            | ProgressEvent::Cancelled { id }
            | ProgressEvent::Failed { id, .. } => *id,
        }
    }

    /// True for the three events that end an operation's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. }
                | ProgressEvent::Cancelled { .. }
                | ProgressEvent::Failed { .. }
        )
    }
}

/// Snapshot of the currently active operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Identifier of the active operation.
    pub id: OperationId,
    /// Source URL being processed.
    pub source: String,
    /// Phase the worker is currently in.
    pub phase: Phase,
    /// Bytes transferred so far.
    pub bytes_done: u64,
    /// Total bytes, when known.
    pub bytes_total: Option<u64>,
    /// Latest whole-number percentage, when the total is known.
    pub percent: Option<u8>,
    /// When the operation was accepted.
    pub started_at: DateTime<Utc>,
}
