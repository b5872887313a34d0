//! Single-flight operation runner.
//!
//! The `OperationRunner` struct and its methods are organized by domain:
//! - [`control`] - Operation lifecycle control (start/cancel/inspect)
//! - [`worker`] - Pipeline execution (resolve, transfer, finalize, move)
//! - [`progress`] - Raw progress normalization

mod control;
mod progress;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tracing::debug;

use crate::cache::ResolveCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::source::MediaSource;
use crate::transcode::Transcoder;
use crate::types::{MediaMetadata, OperationId, OperationInfo, ProgressEvent};

/// The single-flight slot: `Some` while an operation is running.
pub(crate) struct ActiveOperation {
    pub(crate) id: OperationId,
    pub(crate) cancel: tokio_util::sync::CancellationToken,
    /// Live snapshot updated by the worker, read by `active_operation`.
    pub(crate) info: Arc<std::sync::Mutex<OperationInfo>>,
}

/// Runs media download operations one at a time (cloneable - all fields
/// are Arc-wrapped).
///
/// Exactly one operation is in flight at any moment; starting a second one
/// while the first is active fails with [`Error::Busy`]. All progress is
/// delivered through a broadcast channel obtained from
/// [`subscribe`](OperationRunner::subscribe).
#[derive(Clone)]
pub struct OperationRunner {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Media backend (trait object for pluggable implementations)
    pub(crate) source: Arc<dyn MediaSource>,
    /// Conversion tool located at construction time
    pub(crate) transcoder: Transcoder,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<ProgressEvent>,
    /// Single-flight slot guarding concurrent starts
    pub(crate) active: Arc<tokio::sync::Mutex<Option<ActiveOperation>>>,
    /// Monotonic operation id allocator; ids are never reused
    pub(crate) next_id: Arc<AtomicU64>,
    /// Recently resolved metadata, keyed by source URL
    pub(crate) resolve_cache: Arc<ResolveCache>,
}

impl OperationRunner {
    /// Create a new runner.
    ///
    /// Creates the staging directory and locates the conversion tool;
    /// fails with [`Error::MissingDependency`] when ffmpeg cannot be
    /// found, so the problem is visible before any operation starts.
    pub async fn new(config: Config, source: Arc<dyn MediaSource>) -> Result<Self> {
        tokio::fs::create_dir_all(config.work_dir()).await.map_err(|e| {
            Error::Filesystem(format!(
                "failed to create staging directory '{}': {}",
                config.work_dir().display(),
                e
            ))
        })?;

        let transcoder = Transcoder::locate(&config.tools)
            .ok_or_else(|| Error::MissingDependency("ffmpeg".to_string()))?;

        Ok(Self::assemble(config, source, transcoder))
    }

    /// Wires up a runner from already-validated parts.
    pub(crate) fn assemble(
        config: Config,
        source: Arc<dyn MediaSource>,
        transcoder: Transcoder,
    ) -> Self {
        let (event_tx, _) = tokio::sync::broadcast::channel(config.event_buffer().max(1));
        let resolve_cache = Arc::new(ResolveCache::new(config.download.resolve_cache_entries));
        OperationRunner {
            config: Arc::new(config),
            source,
            transcoder,
            event_tx,
            active: Arc::new(tokio::sync::Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
            resolve_cache,
        }
    }

    /// Subscribe to progress events.
    ///
    /// Each subscriber gets every event from the moment of subscription.
    /// Slow subscribers may observe a lag error from the broadcast channel
    /// and should resynchronize from the next event.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.event_tx.subscribe()
    }

    /// Resolved-metadata cache shared by all clones of this runner.
    pub fn resolve_cache(&self) -> &ResolveCache {
        &self.resolve_cache
    }

    /// Resolves metadata for a URL, consulting the cache first.
    pub async fn resolve(&self, url: &url::Url) -> Result<MediaMetadata> {
        if let Some(hit) = self.resolve_cache.get(url.as_str()) {
            debug!(url = %url, "metadata cache hit");
            return Ok(hit);
        }
        let metadata = self.source.resolve(url).await?;
        self.resolve_cache.insert(url.as_str(), metadata.clone());
        Ok(metadata)
    }

    /// Broadcasts an event; delivery failures mean no subscribers, which
    /// is fine.
    pub(crate) fn emit_event(&self, event: ProgressEvent) {
        debug!(?event, "emitting event");
        self.event_tx.send(event).ok();
    }
}
