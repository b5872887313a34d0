//! End-to-end test through the public API only: a fake backend drives a
//! full operation and an `ObserverState` consumes the event stream the way
//! a frontend would.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use media_dl::{
    CliMediaSource, Config, Error, MediaMetadata, MediaSource, ObserverState, OperationRequest,
    OperationRunner, Outcome, OutputSpec, ProgressEvent, ProgressSink, RawPhase, RawProgress,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Backend that simulates a short transfer entirely on the filesystem.
struct FakeBackend;

#[async_trait]
impl MediaSource for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve(&self, url: &Url) -> Result<MediaMetadata, Error> {
        Ok(MediaMetadata {
            title: "Integration Clip".to_string(),
            duration_seconds: Some(42),
            uploader: None,
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
    ) -> Result<PathBuf, Error> {
        for done in [250u64, 500, 750, 1000] {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            sink(RawProgress {
                phase: RawPhase::Downloading,
                downloaded_bytes: done,
                total_bytes: Some(1000),
                rate_bps: Some(500),
                eta_seconds: Some((1000 - done) / 500),
                message: None,
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sink(RawProgress {
            phase: RawPhase::Finished,
            downloaded_bytes: 1000,
            total_bytes: Some(1000),
            rate_bps: None,
            eta_seconds: None,
            message: None,
        });

        let path = work_dir.join("Integration Clip.mp3");
        tokio::fs::write(&path, b"audio").await?;
        Ok(path)
    }
}

/// Build a runner around a fake backend; an empty marker file stands in
/// for ffmpeg since conversion is never reached in these scenarios.
async fn build_runner() -> (OperationRunner, TempDir, PathBuf) {
    let temp = TempDir::new().expect("temp dir");
    let work_dir = temp.path().join("work");
    let dest_dir = temp.path().join("dest");
    std::fs::create_dir_all(&dest_dir).expect("dest dir");

    let fake_ffmpeg = temp.path().join("ffmpeg");
    std::fs::write(&fake_ffmpeg, "").expect("marker file");

    let mut config = Config::default();
    config.download.work_dir = work_dir;
    config.tools.ffmpeg_path = Some(fake_ffmpeg);
    config.tools.search_path = false;

    let runner = OperationRunner::new(config, Arc::new(FakeBackend))
        .await
        .expect("runner construction");
    (runner, temp, dest_dir)
}

#[tokio::test]
async fn full_operation_through_observer_state() {
    let (runner, _temp, dest_dir) = build_runner().await;
    let mut events = runner.subscribe();
    let mut state = ObserverState::new();

    assert!(state.can_start());
    let handle = runner
        .start(OperationRequest {
            source: "https://www.youtube.com/watch?v=integration".to_string(),
            dest_dir: dest_dir.clone(),
            output: OutputSpec::Audio,
            filename_override: None,
        })
        .await
        .expect("start should be accepted");
    state.mark_started(&handle);
    assert!(!state.can_start());
    assert!(state.can_cancel());

    let mut saw_percent = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        if let ProgressEvent::Transferring {
            percent: Some(percent),
            ..
        } = &event
        {
            saw_percent.push(*percent);
        }
        let terminal = event.is_terminal();
        state.apply(&event);
        if terminal {
            break;
        }
    }

    assert_eq!(saw_percent, vec![25, 50, 75, 100]);
    assert!(state.can_start(), "terminal re-enables start");
    assert!(!state.can_cancel());

    let output = match state.last_outcome() {
        Some(Outcome::Completed(path)) => path.clone(),
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(output, dest_dir.join("Integration Clip.mp3"));
    assert_eq!(std::fs::read(&output).expect("artifact readable"), b"audio");
    assert_eq!(state.status_line(), "Download complete");
}

#[tokio::test]
async fn busy_rejection_leaves_first_operation_untouched() {
    let (runner, _temp, dest_dir) = build_runner().await;
    let mut events = runner.subscribe();

    let request = OperationRequest {
        source: "https://www.youtube.com/watch?v=first".to_string(),
        dest_dir: dest_dir.clone(),
        output: OutputSpec::Audio,
        filename_override: None,
    };
    runner.start(request.clone()).await.expect("first start");
    let second = runner.start(request).await;
    assert!(matches!(second, Err(Error::Busy)));

    // The first operation still runs to completion.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        if event.is_terminal() {
            assert!(matches!(event, ProgressEvent::Completed { .. }));
            break;
        }
    }
}

#[test]
fn missing_ytdlp_is_reported_before_any_operation() {
    let tools = media_dl::ToolsConfig {
        ytdlp_path: Some(PathBuf::from("/nonexistent/yt-dlp")),
        ffmpeg_path: None,
        search_path: false,
    };
    assert!(
        CliMediaSource::from_config(&tools).is_none(),
        "a missing backend binary must be detectable up front"
    );
}
