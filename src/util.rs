//! Utility functions for file naming, collision handling and staging cleanup

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// File suffixes left behind by interrupted transfers
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".download"];

/// Find a destination path that does not collide with an existing file
///
/// If `path` is free it is returned unchanged. Otherwise a ` (1)`, ` (2)`,
/// ... suffix is inserted before the extension until a free name is found.
///
/// # Examples
///
/// ```
/// use media_dl::util::unique_destination;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/this-file-should-not-exist.mp3");
/// let unique = unique_destination(path).unwrap();
/// assert_eq!(unique, path);
/// // If /tmp/song.mp3 existed, /tmp/song (1).mp3 would be tried next.
/// ```
pub fn unique_destination(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Filesystem(format!("cannot extract file stem: {}", path.display())))?;

    let extension = path.extension().and_then(|e| e.to_str());

    let parent = path.parent().ok_or_else(|| {
        Error::Filesystem(format!("cannot extract parent directory: {}", path.display()))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let candidate = parent.join(candidate);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Filesystem(format!(
        "could not find unique filename for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Turn a media title into a safe file name stem
///
/// Strips path separators and characters rejected by common filesystems,
/// trims whitespace, truncates to `max_len` characters and falls back to
/// `fallback` when nothing usable remains.
#[must_use]
pub fn sanitize_title(title: &str, max_len: usize, fallback: &str) -> String {
    let cleaned = sanitize_filename::sanitize(title);
    let cleaned = cleaned.trim();

    let truncated: String = cleaned.chars().take(max_len).collect();
    let truncated = truncated.trim_end().to_string();

    if truncated.is_empty() {
        fallback.to_string()
    } else {
        truncated
    }
}

/// Check whether a file name looks like a leftover partial transfer
///
/// Matches the suffixes yt-dlp and similar tools use for in-progress files
/// (`.part`, `.ytdl`, `.temp`, `.download`) plus fragment files such as
/// `video.mp4.part-Frag12`.
#[must_use]
pub fn is_partial_artifact(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return true;
    }

    // yt-dlp fragment files: "<name>.part-FragN" / "<name>.part-FragN.part"
    name.contains(".part-frag")
}

/// Remove leftover partial-transfer files from a staging directory
///
/// Errors on individual entries are logged and skipped; the sweep itself
/// only fails when the directory cannot be read at all. Returns the number
/// of files removed.
pub async fn sweep_partials(dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        Error::Filesystem(format!("cannot read staging directory {}: {}", dir.display(), e))
    })?;

    let mut removed = 0usize;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to read staging directory entry");
                break;
            }
        };
        let path = entry.path();
        if !is_partial_artifact(&path) {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %path.display(), "removed partial artifact");
                removed += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to remove partial artifact");
            }
        }
    }

    Ok(removed)
}

/// Check that a directory exists and accepts new files
///
/// Probes by creating and removing a marker file; a metadata-based check
/// would miss read-only mounts.
#[must_use]
pub fn dir_is_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(format!(".media-dl-probe-{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(file) => {
            drop(file);
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
