//! Media backend abstraction and the yt-dlp implementation
//!
//! The runner drives a [`MediaSource`] through two calls: `resolve` turns a
//! page URL into metadata, `fetch` transfers the media into the staging
//! directory while streaming raw progress reports through a sink. The
//! production implementation shells out to yt-dlp; tests substitute
//! scripted sources.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::types::{FormatDescriptor, MediaMetadata, OutputSpec};
use crate::util::is_partial_artifact;

/// Raw phase as reported by a backend, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPhase {
    /// Bytes are being transferred.
    Downloading,
    /// Transfer done; the backend is post-processing.
    Finished,
    /// The backend reported an error mid-transfer.
    Error,
}

/// One progress report straight from a backend.
///
/// Field availability varies by backend and by moment; the runner's
/// normalizer fills the gaps and derives percentages.
#[derive(Debug, Clone)]
pub struct RawProgress {
    /// What the backend is doing.
    pub phase: RawPhase,
    /// Bytes transferred so far.
    pub downloaded_bytes: u64,
    /// Total bytes, exact or estimated, when the backend knows it.
    pub total_bytes: Option<u64>,
    /// Current rate in bytes per second, when known.
    pub rate_bps: Option<u64>,
    /// Estimated seconds remaining, when known.
    pub eta_seconds: Option<u64>,
    /// Backend-supplied detail, set on [`RawPhase::Error`].
    pub message: Option<String>,
}

/// Callback receiving raw progress reports during a fetch.
pub type ProgressSink = Box<dyn Fn(RawProgress) + Send + Sync>;

/// A backend capable of resolving and transferring media.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &str;

    /// Resolves metadata for a media page URL without transferring bytes.
    async fn resolve(&self, url: &Url) -> Result<MediaMetadata>;

    /// Transfers the media into `work_dir` and returns the fetched file.
    ///
    /// Implementations report progress through `sink` and must stop promptly
    /// when `cancel` fires, returning [`Error::Cancelled`]. Any partial
    /// output stays inside `work_dir`.
    async fn fetch(
        &self,
        url: &Url,
        output: &OutputSpec,
        work_dir: &Path,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<PathBuf>;
}

/// Prefix our progress template puts on machine-readable stdout lines.
const PROGRESS_PREFIX: &str = "mdl-progress";

/// yt-dlp progress template producing one parseable line per report.
/// Missing fields print as "NA".
const PROGRESS_TEMPLATE: &str = "download:mdl-progress %(progress.downloaded_bytes)s \
     %(progress.total_bytes)s %(progress.total_bytes_estimate)s \
     %(progress.speed)s %(progress.eta)s";

/// Media backend that shells out to the yt-dlp CLI.
pub struct CliMediaSource {
    binary: PathBuf,
}

impl CliMediaSource {
    /// Creates a backend using the given yt-dlp binary.
    pub fn new(binary: PathBuf) -> Self {
        CliMediaSource { binary }
    }

    /// Locates yt-dlp from an explicit config path or PATH search.
    ///
    /// Returns `None` when the binary cannot be found, so callers can
    /// report a missing dependency before accepting work.
    pub fn from_config(tools: &ToolsConfig) -> Option<Self> {
        if let Some(path) = &tools.ytdlp_path {
            if path.exists() {
                info!(path = %path.display(), "using configured yt-dlp binary");
                return Some(Self::new(path.clone()));
            }
            warn!(path = %path.display(), "configured yt-dlp path does not exist");
        }
        if tools.search_path {
            if let Ok(path) = which::which("yt-dlp") {
                info!(path = %path.display(), "found yt-dlp on PATH");
                return Some(Self::new(path));
            }
        }
        None
    }

    /// Path of the underlying binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn fetch_args(&self, url: &Url, output: &OutputSpec, work_dir: &Path) -> Vec<String> {
        let out_template = work_dir.join("%(title)s.%(ext)s");
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "-o".to_string(),
            out_template.to_string_lossy().into_owned(),
        ];
        match output {
            OutputSpec::Audio => {
                args.extend([
                    "-f".to_string(),
                    "bestaudio/best".to_string(),
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    "mp3".to_string(),
                ]);
            }
            OutputSpec::Video { container } => {
                args.extend([
                    "-f".to_string(),
                    "bestvideo+bestaudio/best".to_string(),
                    "--merge-output-format".to_string(),
                    container.extension().to_string(),
                ]);
            }
        }
        args.push(url.to_string());
        args
    }
}

/// Compiled patterns for the lines yt-dlp writes to stdout.
struct OutputLineParser {
    progress: Regex,
    destination: Regex,
    merge: Regex,
}

impl OutputLineParser {
    fn new() -> Result<Self> {
        // yt-dlp names the fetched file in "Destination:" lines and names
        // the merged/extracted result in bracketed post-processor lines.
        Ok(OutputLineParser {
            progress: Regex::new(&format!(
                r"^{PROGRESS_PREFIX} (\S+) (\S+) (\S+) (\S+) (\S+)"
            ))
            .map_err(|e| Error::Unexpected(format!("bad progress pattern: {e}")))?,
            destination: Regex::new(r"Destination:\s+(.+)$")
                .map_err(|e| Error::Unexpected(format!("bad destination pattern: {e}")))?,
            merge: Regex::new(r#"Merging formats into "(.+)""#)
                .map_err(|e| Error::Unexpected(format!("bad merge pattern: {e}")))?,
        })
    }

    fn parse_progress(&self, line: &str) -> Option<RawProgress> {
        let caps = self.progress.captures(line)?;
        let downloaded = parse_count(caps.get(1)?.as_str())?;
        let total = parse_count(caps.get(2).map_or("NA", |m| m.as_str()))
            .or_else(|| parse_count(caps.get(3).map_or("NA", |m| m.as_str())));
        let rate = parse_count(caps.get(4).map_or("NA", |m| m.as_str()));
        let eta = parse_count(caps.get(5).map_or("NA", |m| m.as_str()));
        Some(RawProgress {
            phase: RawPhase::Downloading,
            downloaded_bytes: downloaded,
            total_bytes: total,
            rate_bps: rate,
            eta_seconds: eta,
            message: None,
        })
    }

    fn parse_output_path(&self, line: &str) -> Option<PathBuf> {
        if let Some(caps) = self.merge.captures(line) {
            return Some(PathBuf::from(caps.get(1)?.as_str()));
        }
        if let Some(caps) = self.destination.captures(line) {
            return Some(PathBuf::from(caps.get(1)?.as_str().trim()));
        }
        None
    }
}

/// Parses a numeric field that may be "NA", an integer or a float.
fn parse_count(field: &str) -> Option<u64> {
    if field == "NA" || field == "None" {
        return None;
    }
    if let Ok(value) = field.parse::<u64>() {
        return Some(value);
    }
    field.parse::<f64>().ok().map(|value| value.max(0.0) as u64)
}

#[async_trait]
impl MediaSource for CliMediaSource {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &Url) -> Result<MediaMetadata> {
        debug!(url = %url, "resolving metadata");
        let output = Command::new(&self.binary)
            .arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url.as_str())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Download(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Download(format!(
                "metadata resolution failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Download(format!("unparseable metadata: {e}")))?;

        let title = value["title"].as_str().unwrap_or("download").to_string();
        let formats = value["formats"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        Some(FormatDescriptor {
                            id: entry["format_id"].as_str()?.to_string(),
                            ext: entry["ext"].as_str().unwrap_or("").to_string(),
                            height: entry["height"].as_u64().map(|h| h as u32),
                            filesize: entry["filesize"].as_u64(),
                            audio_only: entry["vcodec"].as_str() == Some("none"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(MediaMetadata {
            title,
            duration_seconds: value["duration"].as_u64(),
            uploader: value["uploader"].as_str().map(str::to_string),
            webpage_url: value["webpage_url"]
                .as_str()
                .unwrap_or(url.as_str())
                .to_string(),
            formats,
        })
    }

    async fn fetch(
        &self,
        url: &Url,
        output: &OutputSpec,
        work_dir: &Path,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        let parser = OutputLineParser::new()?;
        let args = self.fetch_args(url, output, work_dir);
        debug!(url = %url, ?args, "starting transfer");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Download(format!("failed to run yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Unexpected("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Unexpected("child stderr not captured".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() >= 10 {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail.join("\n")
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut fetched_path: Option<PathBuf> = None;
        let mut was_cancelled = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !was_cancelled => {
                    info!(url = %url, "cancellation requested, stopping yt-dlp");
                    // Terminating the transfer is safe: partials stay in the
                    // staging directory and are swept afterwards.
                    child.start_kill().map_err(|e| {
                        Error::Unexpected(format!("failed to signal yt-dlp: {e}"))
                    })?;
                    was_cancelled = true;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(raw) = parser.parse_progress(&line) {
                                sink(raw);
                            } else if let Some(path) = parser.parse_output_path(&line) {
                                fetched_path = Some(path);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "failed to read yt-dlp output");
                            break;
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Download(format!("failed to wait for yt-dlp: {e}")))?;

        if was_cancelled || cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !status.success() {
            let stderr_tail = stderr_task.await.unwrap_or_default();
            sink(RawProgress {
                phase: RawPhase::Error,
                downloaded_bytes: 0,
                total_bytes: None,
                rate_bps: None,
                eta_seconds: None,
                message: Some(stderr_tail.clone()),
            });
            return Err(Error::Download(if stderr_tail.is_empty() {
                format!("yt-dlp exited with {status}")
            } else {
                stderr_tail
            }));
        }
        stderr_task.abort();

        sink(RawProgress {
            phase: RawPhase::Finished,
            downloaded_bytes: 0,
            total_bytes: None,
            rate_bps: None,
            eta_seconds: None,
            message: None,
        });

        match fetched_path {
            Some(path) if path.exists() => Ok(path),
            _ => newest_media_file(work_dir).await,
        }
    }
}

/// Fallback when the output path could not be parsed from yt-dlp's output:
/// the most recently modified non-partial file in the staging directory.
async fn newest_media_file(work_dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(work_dir)
        .await
        .map_err(|e| Error::Filesystem(format!("cannot read staging directory: {e}")))?;

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_file() || is_partial_artifact(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .await
            .and_then(|meta| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(when, _)| modified > *when) {
            newest = Some((modified, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| Error::Download("transfer produced no output file".into()))
}
