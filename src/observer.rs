//! Progress observation: UI-facing state derivation and event forwarding.
//!
//! [`ObserverState`] is a pure state machine a frontend feeds events into;
//! it answers "may the user start?", "may the user cancel?" and "what
//! should the status line say?" without touching any UI toolkit.
//! [`ProgressObserver`] plus [`forward_events`] connect a runner's event
//! stream to async consumers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::types::{OperationHandle, OperationId, Phase, ProgressEvent};

/// How the last finished operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The artifact landed at this path.
    Completed(PathBuf),
    /// The operation stopped at the user's request.
    Cancelled,
    /// The operation failed.
    Failed {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

/// Derived state for driving start/cancel affordances and a status line.
///
/// Feed it [`mark_started`](ObserverState::mark_started) when a start call
/// is accepted and [`apply`](ObserverState::apply) for every event from the
/// runner. Events for operations other than the tracked one are ignored,
/// so late events from a finished operation cannot corrupt the state.
#[derive(Debug, Clone)]
pub struct ObserverState {
    current: Option<OperationId>,
    phase: Option<Phase>,
    percent: Option<u8>,
    status_line: String,
    last_outcome: Option<Outcome>,
}

impl ObserverState {
    /// Idle state: start allowed, cancel not.
    pub fn new() -> Self {
        ObserverState {
            current: None,
            phase: None,
            percent: None,
            status_line: "Ready".to_string(),
            last_outcome: None,
        }
    }

    /// Record that a start call was accepted for `handle`.
    ///
    /// Called before the first event arrives so the start affordance is
    /// disabled with no window for a double-start.
    pub fn mark_started(&mut self, handle: &OperationHandle) {
        self.current = Some(handle.id());
        self.phase = Some(Phase::Queued);
        self.percent = None;
        self.last_outcome = None;
        self.status_line = "Starting...".to_string();
    }

    /// Fold one runner event into the state.
    pub fn apply(&mut self, event: &ProgressEvent) {
        let Some(current) = self.current else {
            debug!(?event, "ignoring event while idle");
            return;
        };
        if event.id() != current {
            debug!(?event, %current, "ignoring event for a different operation");
            return;
        }

        match event {
            ProgressEvent::Queued { .. } => {
                self.phase = Some(Phase::Queued);
                self.status_line = "Queued".to_string();
            }
            ProgressEvent::Resolving { .. } => {
                self.phase = Some(Phase::Resolving);
                self.status_line = "Fetching media details...".to_string();
            }
            ProgressEvent::Transferring {
                bytes_done,
                percent,
                ..
            } => {
                self.phase = Some(Phase::Transferring);
                self.percent = *percent;
                self.status_line = match percent {
                    Some(percent) => format!("Downloading... {percent}%"),
                    None => format!("Downloading... {} bytes", bytes_done),
                };
            }
            ProgressEvent::Finalizing { .. } => {
                self.phase = Some(Phase::Finalizing);
                self.status_line = "Converting...".to_string();
            }
            ProgressEvent::Completed { output_path, .. } => {
                self.finish(Outcome::Completed(output_path.clone()));
                self.status_line = "Download complete".to_string();
            }
            ProgressEvent::Cancelled { .. } => {
                self.finish(Outcome::Cancelled);
                self.status_line = "Download cancelled".to_string();
            }
            ProgressEvent::Failed { kind, message, .. } => {
                self.finish(Outcome::Failed {
                    kind: *kind,
                    message: message.clone(),
                });
                self.status_line = format!("Download failed: {message}");
            }
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.current = None;
        self.phase = None;
        self.percent = None;
        self.last_outcome = Some(outcome);
    }

    /// True when a new operation may be started.
    pub fn can_start(&self) -> bool {
        self.current.is_none()
    }

    /// True when there is a live operation to cancel.
    pub fn can_cancel(&self) -> bool {
        self.current.is_some()
    }

    /// Phase of the tracked operation, `None` when idle.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Latest known percentage, `None` when idle or the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        self.percent
    }

    /// One-line human-readable status.
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// How the most recently finished operation ended.
    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }
}

impl Default for ObserverState {
    fn default() -> Self {
        Self::new()
    }
}

/// Async consumer of a runner's event stream.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    /// Called for every event, terminals included.
    async fn on_event(&self, event: &ProgressEvent);

    /// Called once per operation after its terminal event.
    async fn on_terminal(&self, outcome: &Outcome) {
        let _ = outcome;
    }
}

/// Pumps events from a subscription into an observer until the channel
/// closes. Lagged receivers are resynchronized with a warning rather than
/// stopping the pump.
pub async fn forward_events(
    mut rx: broadcast::Receiver<ProgressEvent>,
    observer: Arc<dyn ProgressObserver>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                observer.on_event(&event).await;
                let outcome = match &event {
                    ProgressEvent::Completed { output_path, .. } => {
                        Some(Outcome::Completed(output_path.clone()))
                    }
                    ProgressEvent::Cancelled { .. } => Some(Outcome::Cancelled),
                    ProgressEvent::Failed { kind, message, .. } => Some(Outcome::Failed {
                        kind: *kind,
                        message: message.clone(),
                    }),
                    _ => None,
                };
                if let Some(outcome) = outcome {
                    observer.on_terminal(&outcome).await;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "observer lagged behind the event stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
