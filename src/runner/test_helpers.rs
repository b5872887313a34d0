//! Shared fixtures for runner tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::OperationRunner;
use crate::source::{MediaSource, ProgressSink, RawPhase, RawProgress};
use crate::transcode::Transcoder;
use crate::types::{MediaMetadata, OperationRequest, OutputSpec, ProgressEvent};

/// How a scripted fetch ends.
pub(crate) enum ScriptedOutcome {
    /// Write a file with this name into the staging directory and return it.
    Produce(String),
    /// Fail with a transfer error carrying this message.
    Fail(String),
    /// Park until the cancellation token fires.
    WaitForCancel,
}

/// A backend that replays a fixed script instead of touching the network.
pub(crate) struct ScriptedSource {
    pub(crate) title: String,
    pub(crate) reports: Vec<RawProgress>,
    pub(crate) outcome: ScriptedOutcome,
    pub(crate) resolve_calls: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn new(title: &str, reports: Vec<RawProgress>, outcome: ScriptedOutcome) -> Self {
        ScriptedSource {
            title: title.to_string(),
            reports,
            outcome,
            resolve_calls: AtomicUsize::new(0),
        }
    }

    /// A source that transfers cleanly and produces `file_name`.
    pub(crate) fn happy(title: &str, file_name: &str) -> Self {
        Self::new(
            title,
            vec![
                transfer_report(500, Some(1000)),
                transfer_report(1000, Some(1000)),
                finished_report(),
            ],
            ScriptedOutcome::Produce(file_name.to_string()),
        )
    }
}

#[async_trait]
impl MediaSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn resolve(&self, url: &Url) -> Result<MediaMetadata> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MediaMetadata {
            title: self.title.clone(),
            duration_seconds: Some(180),
            uploader: Some("Test Channel".to_string()),
            webpage_url: url.to_string(),
            formats: Vec::new(),
        })
    }

    async fn fetch(
        &self,
        _url: &Url,
        _output: &OutputSpec,
        work_dir: &Path,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        for report in &self.reports {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            sink(report.clone());
            // Let subscribers observe events in order.
            tokio::task::yield_now().await;
        }

        match &self.outcome {
            ScriptedOutcome::Produce(file_name) => {
                let path = work_dir.join(file_name);
                tokio::fs::write(&path, b"media bytes").await?;
                Ok(path)
            }
            ScriptedOutcome::Fail(message) => Err(Error::Download(message.clone())),
            ScriptedOutcome::WaitForCancel => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        }
    }
}

pub(crate) fn transfer_report(done: u64, total: Option<u64>) -> RawProgress {
    RawProgress {
        phase: RawPhase::Downloading,
        downloaded_bytes: done,
        total_bytes: total,
        rate_bps: Some(2048),
        eta_seconds: Some(3),
        message: None,
    }
}

pub(crate) fn finished_report() -> RawProgress {
    RawProgress {
        phase: RawPhase::Finished,
        downloaded_bytes: 0,
        total_bytes: None,
        rate_bps: None,
        eta_seconds: None,
        message: None,
    }
}

/// Builds a runner around `source` with staging and destination
/// directories inside a fresh temp dir.
///
/// The transcoder points at the test binary itself, which exists without
/// being runnable as ffmpeg; scripted fetches produce files already in the
/// requested format so conversion is never invoked. Tests that exercise
/// conversion swap in a [`fake_converter`] via `create_test_runner_with`.
pub(crate) fn create_test_runner(
    source: Arc<dyn MediaSource>,
) -> (OperationRunner, TempDir, PathBuf) {
    let transcoder = Transcoder::new(
        std::env::current_exe().expect("test binary path should be known"),
    );
    create_test_runner_with(source, transcoder)
}

/// Like [`create_test_runner`], with an explicit transcoder.
pub(crate) fn create_test_runner_with(
    source: Arc<dyn MediaSource>,
    transcoder: Transcoder,
) -> (OperationRunner, TempDir, PathBuf) {
    let temp = TempDir::new().expect("temp dir should be creatable");
    let work_dir = temp.path().join("work");
    let dest_dir = temp.path().join("dest");
    std::fs::create_dir_all(&work_dir).expect("work dir should be creatable");
    std::fs::create_dir_all(&dest_dir).expect("dest dir should be creatable");

    let mut config = Config::default();
    config.download.work_dir = work_dir;

    let runner = OperationRunner::assemble(config, source, transcoder);
    (runner, temp, dest_dir)
}

/// A transcoder backed by a shell script standing in for ffmpeg.
///
/// The script receives the real ffmpeg argument list, so `$2` is the input
/// file and the last argument is the output path. The returned temp dir
/// keeps the script alive for the duration of the test.
#[cfg(unix)]
pub(crate) fn fake_converter(script_body: &str) -> (Transcoder, TempDir) {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().expect("temp dir should be creatable");
    let path = temp.path().join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n"))
        .expect("converter script should be writable");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("converter script should be markable executable");
    (Transcoder::new(path), temp)
}

/// An audio request pointing at `dest_dir`.
pub(crate) fn audio_request(dest_dir: &Path) -> OperationRequest {
    OperationRequest {
        source: "https://www.youtube.com/watch?v=test123".to_string(),
        dest_dir: dest_dir.to_path_buf(),
        output: OutputSpec::Audio,
        filename_override: None,
    }
}

/// Collects events until (and including) the terminal one.
pub(crate) async fn collect_until_terminal(
    rx: &mut broadcast::Receiver<ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("event channel closed before the terminal event");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Asserts that no further event arrives within a grace period.
pub(crate) async fn assert_stream_quiet(rx: &mut broadcast::Receiver<ProgressEvent>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(
        extra.is_err(),
        "no event may follow the terminal one, got {:?}",
        extra
    );
}
