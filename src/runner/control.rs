//! Operation lifecycle control: start, cancel, inspect.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use super::{ActiveOperation, OperationRunner, worker};
use crate::error::{Error, Result};
use crate::types::{OperationHandle, OperationId, OperationInfo, OperationRequest, Phase};
use crate::util::dir_is_writable;

impl OperationRunner {
    /// Start an operation.
    ///
    /// Validation failures (`InvalidSource`, `InvalidDestination`,
    /// `MissingDependency`, `Busy`) are returned synchronously and emit no
    /// events. On success the pipeline runs on a background task and the
    /// returned handle identifies it for [`cancel`](Self::cancel); all
    /// further outcomes arrive through the event stream.
    pub async fn start(&self, request: OperationRequest) -> Result<OperationHandle> {
        let url = validate_source(&request.source)?;
        validate_destination(&request.dest_dir)?;

        // The tool may have been removed since construction.
        if !self.transcoder.is_available() {
            return Err(Error::MissingDependency("ffmpeg".to_string()));
        }

        // Claim the single-flight slot atomically with the busy check.
        let mut slot = self.active.lock().await;
        if slot.is_some() {
            return Err(Error::Busy);
        }

        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let info = Arc::new(std::sync::Mutex::new(OperationInfo {
            id,
            source: request.source.clone(),
            phase: Phase::Queued,
            bytes_done: 0,
            bytes_total: None,
            percent: None,
            started_at: Utc::now(),
        }));

        *slot = Some(ActiveOperation {
            id,
            cancel: cancel.clone(),
            info: info.clone(),
        });
        drop(slot);

        info!(%id, source = %request.source, "operation accepted");
        tokio::spawn(worker::run_operation(
            self.clone(),
            request,
            url,
            id,
            cancel,
            info,
        ));

        Ok(OperationHandle::new(id))
    }

    /// Request cancellation of the operation the handle refers to.
    ///
    /// Returns `true` when the request was delivered to a live operation.
    /// Stale handles (operation already finished, or a different operation
    /// is running) and repeat calls return `false`; both are harmless.
    /// The operation's terminal event arrives through the event stream.
    pub async fn cancel(&self, handle: &OperationHandle) -> bool {
        let slot = self.active.lock().await;
        match slot.as_ref() {
            Some(active) if active.id == handle.id() => {
                if active.cancel.is_cancelled() {
                    return false;
                }
                info!(id = %active.id, "cancellation requested");
                active.cancel.cancel();
                true
            }
            Some(active) => {
                warn!(
                    requested = %handle.id(),
                    active = %active.id,
                    "cancel ignored for stale handle"
                );
                false
            }
            None => false,
        }
    }

    /// True while an operation is in flight.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Snapshot of the active operation, or `None` when idle.
    pub async fn active_operation(&self) -> Option<OperationInfo> {
        let slot = self.active.lock().await;
        slot.as_ref().map(|active| {
            match active.info.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        })
    }
}

/// Accepts http(s) URLs with a host; everything else is rejected before
/// any work is queued.
fn validate_source(source: &str) -> Result<Url> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidSource("empty URL".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| Error::InvalidSource(format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidSource(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::InvalidSource(format!("{trimmed}: missing host")));
    }
    Ok(url)
}

/// The destination must exist and accept new files before work starts;
/// finding out at move time would waste the whole transfer.
fn validate_destination(dest_dir: &Path) -> Result<()> {
    if !dest_dir.is_dir() {
        return Err(Error::InvalidDestination(format!(
            "{}: not a directory",
            dest_dir.display()
        )));
    }
    if !dir_is_writable(dest_dir) {
        return Err(Error::InvalidDestination(format!(
            "{}: not writable",
            dest_dir.display()
        )));
    }
    Ok(())
}
