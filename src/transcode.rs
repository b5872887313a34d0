//! ffmpeg-based conversion of fetched media
//!
//! Conversions run to completion even when the operation is cancelled
//! mid-way through an earlier phase; killing ffmpeg risks a corrupt file,
//! and the result lives in the staging directory where cleanup handles it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::types::OutputSpec;

/// Wrapper around an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct Transcoder {
    binary: PathBuf,
}

impl Transcoder {
    /// Creates a transcoder using the given ffmpeg binary.
    pub fn new(binary: PathBuf) -> Self {
        Transcoder { binary }
    }

    /// Locates ffmpeg from an explicit config path or PATH search.
    pub fn locate(tools: &ToolsConfig) -> Option<Self> {
        if let Some(path) = &tools.ffmpeg_path {
            if path.exists() {
                info!(path = %path.display(), "using configured ffmpeg binary");
                return Some(Self::new(path.clone()));
            }
            warn!(path = %path.display(), "configured ffmpeg path does not exist");
        }
        if tools.search_path {
            if let Ok(path) = which::which("ffmpeg") {
                info!(path = %path.display(), "found ffmpeg on PATH");
                return Some(Self::new(path));
            }
        }
        None
    }

    /// True while the binary this transcoder was built with still exists.
    ///
    /// Checked again at operation start so a tool removed after startup
    /// fails fast instead of failing mid-pipeline.
    pub fn is_available(&self) -> bool {
        self.binary.exists()
    }

    /// Path of the underlying binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Converts `input` to `output` according to the output spec.
    ///
    /// Audio output is re-encoded to MP3; video output is remuxed into the
    /// target container without re-encoding streams.
    pub async fn convert(
        &self,
        input: &Path,
        output_spec: &OutputSpec,
        output: &Path,
    ) -> Result<()> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i")
            .arg(input)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error");

        match output_spec {
            OutputSpec::Audio => {
                command
                    .arg("-vn")
                    .arg("-codec:a")
                    .arg("libmp3lame")
                    .arg("-qscale:a")
                    .arg("2");
            }
            OutputSpec::Video { .. } => {
                command.arg("-c").arg("copy");
            }
        }
        command.arg(output);

        debug!(input = %input.display(), output = %output.display(), "running ffmpeg");
        let result = command
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Conversion(format!("failed to run ffmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Conversion(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        if !output.exists() {
            return Err(Error::Conversion(format!(
                "ffmpeg reported success but produced no file: {}",
                output.display()
            )));
        }

        Ok(())
    }
}
