//! Pipeline execution: resolve, transfer, finalize, move.
//!
//! The worker owns the single-flight slot for the duration of one
//! operation and guarantees exactly one terminal event, whatever happens
//! inside the pipeline. The slot is released before the terminal event is
//! broadcast, so an observer reacting to the terminal can start the next
//! operation immediately.

use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use super::progress::ProgressNormalizer;
use super::OperationRunner;
use crate::error::{Error, ErrorKind, Result};
use crate::source::ProgressSink;
use crate::types::{OperationId, OperationInfo, OperationRequest, Phase, ProgressEvent};
use crate::util::{sanitize_title, sweep_partials, unique_destination};

/// Entry point spawned by `start`.
pub(super) async fn run_operation(
    runner: OperationRunner,
    request: OperationRequest,
    url: Url,
    id: OperationId,
    cancel: CancellationToken,
    info: Arc<std::sync::Mutex<OperationInfo>>,
) {
    let outcome = std::panic::AssertUnwindSafe(execute(
        &runner, &request, &url, id, &cancel, &info,
    ))
    .catch_unwind()
    .await;

    // Whatever the outcome, no partial artifact survives past the
    // terminal event.
    if let Err(error) = sweep_partials(runner.config.work_dir()).await {
        warn!(%id, %error, "final staging sweep failed");
    }

    // Release the slot first: by the time the terminal event is observed,
    // a new start must succeed.
    {
        let mut slot = runner.active.lock().await;
        if slot.as_ref().is_some_and(|active| active.id == id) {
            *slot = None;
        }
    }

    let terminal = match outcome {
        Ok(Ok(output_path)) => {
            info!(%id, path = %output_path.display(), "operation completed");
            ProgressEvent::Completed { id, output_path }
        }
        Ok(Err(Error::Cancelled)) => {
            info!(%id, "operation cancelled");
            ProgressEvent::Cancelled { id }
        }
        // A kill issued on cancellation surfaces from the backend as a
        // transfer failure; report what the caller asked for.
        Ok(Err(Error::Download(_))) if cancel.is_cancelled() => {
            info!(%id, "operation cancelled during transfer");
            ProgressEvent::Cancelled { id }
        }
        Ok(Err(error)) => {
            warn!(%id, %error, "operation failed");
            ProgressEvent::Failed {
                id,
                kind: error.kind(),
                message: error.to_string(),
            }
        }
        Err(_) => {
            warn!(%id, "operation worker panicked");
            ProgressEvent::Failed {
                id,
                kind: ErrorKind::Unexpected,
                message: "operation worker panicked".to_string(),
            }
        }
    };

    runner.emit_event(terminal);
}

/// The pipeline proper. Cancellation checkpoints sit between phases; the
/// transfer additionally observes the token from the inside.
async fn execute(
    runner: &OperationRunner,
    request: &OperationRequest,
    url: &Url,
    id: OperationId,
    cancel: &CancellationToken,
    info: &Arc<std::sync::Mutex<OperationInfo>>,
) -> Result<PathBuf> {
    let work_dir = runner.config.work_dir().clone();

    // Clear leftovers from any previously interrupted operation.
    if let Err(error) = sweep_partials(&work_dir).await {
        warn!(%id, %error, "staging sweep failed, continuing");
    }

    runner.emit_event(ProgressEvent::Queued { id });

    checkpoint(cancel)?;
    set_phase(info, Phase::Resolving);
    runner.emit_event(ProgressEvent::Resolving { id });
    let metadata = runner.resolve(url).await?;

    checkpoint(cancel)?;
    set_phase(info, Phase::Transferring);
    let normalizer = Arc::new(std::sync::Mutex::new(ProgressNormalizer::new(
        id,
        runner.config.download.min_percent_step,
    )));
    let sink = make_sink(runner.clone(), normalizer.clone(), info.clone());
    let fetched = runner
        .source
        .fetch(url, &request.output, &work_dir, sink, cancel.clone())
        .await?;

    checkpoint(cancel)?;

    let target_ext = request.output.extension();
    let needs_transcode = fetched
        .extension()
        .and_then(|ext| ext.to_str())
        .is_none_or(|ext| !ext.eq_ignore_ascii_case(target_ext));

    let staged = if needs_transcode {
        set_phase(info, Phase::Finalizing);
        let already_emitted = match normalizer.lock() {
            Ok(guard) => guard.finalizing_emitted(),
            Err(poisoned) => poisoned.into_inner().finalizing_emitted(),
        };
        if !already_emitted {
            runner.emit_event(ProgressEvent::Finalizing { id });
        }

        let stem = fetched
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("converted");
        let converted = work_dir.join(format!("{stem}.{target_ext}"));
        // Runs to completion even if cancellation fires now: killing the
        // conversion could leave a corrupt file.
        runner
            .transcoder
            .convert(&fetched, &request.output, &converted)
            .await?;
        if let Err(error) = tokio::fs::remove_file(&fetched).await {
            warn!(%id, file = %fetched.display(), %error, "failed to remove intermediate file");
        }
        converted
    } else {
        fetched
    };

    // The conversion itself is never interrupted, but a cancel accepted
    // while it ran still wins: discard the staged artifact instead of
    // delivering it.
    if cancel.is_cancelled() {
        tokio::fs::remove_file(&staged).await.ok();
        return Err(Error::Cancelled);
    }

    let stem_source = request
        .filename_override
        .as_deref()
        .unwrap_or(&metadata.title);
    let stem = sanitize_title(
        stem_source,
        runner.config.naming.max_name_len,
        &runner.config.naming.fallback_name,
    );
    let destination = request.dest_dir.join(format!("{stem}.{target_ext}"));
    let destination = unique_destination(&destination)?;
    move_into_place(&staged, &destination).await?;

    Ok(destination)
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn set_phase(info: &Arc<std::sync::Mutex<OperationInfo>>, phase: Phase) {
    let mut guard = match info.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.phase = phase;
}

/// Builds the callback handed to the backend: normalize each raw report,
/// refresh the live snapshot, broadcast the event.
fn make_sink(
    runner: OperationRunner,
    normalizer: Arc<std::sync::Mutex<ProgressNormalizer>>,
    info: Arc<std::sync::Mutex<OperationInfo>>,
) -> ProgressSink {
    Box::new(move |raw| {
        let event = {
            let mut guard = match normalizer.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.normalize(&raw)
        };
        let Some(event) = event else { return };

        {
            let mut snapshot = match info.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match &event {
                ProgressEvent::Transferring {
                    bytes_done,
                    bytes_total,
                    percent,
                    ..
                } => {
                    snapshot.phase = Phase::Transferring;
                    snapshot.bytes_done = *bytes_done;
                    snapshot.bytes_total = *bytes_total;
                    snapshot.percent = *percent;
                }
                ProgressEvent::Finalizing { .. } => snapshot.phase = Phase::Finalizing,
                _ => {}
            }
        }

        runner.emit_event(event);
    })
}

/// Rename, falling back to copy-and-delete for cross-device moves.
async fn move_into_place(staged: &PathBuf, destination: &PathBuf) -> Result<()> {
    match tokio::fs::rename(staged, destination).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(staged, destination).await.map_err(|e| {
                Error::Filesystem(format!(
                    "failed to move '{}' to '{}': {}",
                    staged.display(),
                    destination.display(),
                    e
                ))
            })?;
            if let Err(error) = tokio::fs::remove_file(staged).await {
                warn!(file = %staged.display(), %error, "failed to remove staged copy");
            }
            Ok(())
        }
    }
}
