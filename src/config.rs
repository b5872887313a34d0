//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Download behavior configuration (staging directory, event delivery)
///
/// Groups settings related to how transfers are staged and how progress is
/// reported. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Working directory for in-progress transfers (default: "./work")
    ///
    /// Partial and intermediate files only ever live here; the destination
    /// directory receives finished artifacts in a single move.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Capacity of the progress event channel (default: 256)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Minimum whole-percent change between consecutive transfer events
    /// (default: 1)
    ///
    /// Transfer reports that advance by less than this are dropped, except
    /// the first report and any report reaching 100%.
    #[serde(default = "default_min_percent_step")]
    pub min_percent_step: u8,

    /// Number of resolved-metadata entries kept in the in-memory cache
    /// (default: 32)
    #[serde(default = "default_resolve_cache_entries")]
    pub resolve_cache_entries: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            event_buffer: default_event_buffer(),
            min_percent_step: default_min_percent_step(),
            resolve_cache_entries: default_resolve_cache_entries(),
        }
    }
}

/// External tool paths (yt-dlp, ffmpeg)
///
/// Groups settings for external binaries. Used as a nested sub-config
/// within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to the ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not
    /// set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Output file naming configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Maximum length of a generated file name stem, in characters
    /// (default: 200)
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// Name used when a sanitized title comes out empty
    /// (default: "download")
    #[serde(default = "default_fallback_name")]
    pub fallback_name: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            max_name_len: default_max_name_len(),
            fallback_name: default_fallback_name(),
        }
    }
}

/// Main configuration for the operation runner
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — staging directory, event delivery
/// - [`tools`](ToolsConfig) — external binary paths
/// - [`naming`](NamingConfig) — output file naming
///
/// All sub-config fields are flattened so the JSON/TOML format stays flat
/// (no nesting). Frequently used fields are also reachable through accessor
/// methods on `Config`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Staging and event delivery settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Output file naming
    #[serde(flatten)]
    pub naming: NamingConfig,
}

// Convenience accessors delegating to the sub-config structs.
impl Config {
    /// Working directory for in-progress transfers
    pub fn work_dir(&self) -> &PathBuf {
        &self.download.work_dir
    }

    /// Progress event channel capacity
    pub fn event_buffer(&self) -> usize {
        self.download.event_buffer
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_event_buffer() -> usize {
    256
}

fn default_min_percent_step() -> u8 {
    1
}

fn default_resolve_cache_entries() -> usize {
    32
}

fn default_max_name_len() -> usize {
    200
}

fn default_fallback_name() -> String {
    "download".to_string()
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_on_empty_document() {
        let config: Config = serde_json::from_str("{}").expect("empty config should parse");
        assert_eq!(config.download.work_dir, PathBuf::from("./work"));
        assert_eq!(config.download.event_buffer, 256);
        assert_eq!(config.download.min_percent_step, 1);
        assert_eq!(config.download.resolve_cache_entries, 32);
        assert!(config.tools.ytdlp_path.is_none());
        assert!(config.tools.search_path, "PATH search defaults on");
        assert_eq!(config.naming.max_name_len, 200);
        assert_eq!(config.naming.fallback_name, "download");
    }

    #[test]
    fn flattened_fields_parse_without_nesting() {
        let config: Config = serde_json::from_str(
            r#"{"work_dir": "/var/stage", "ffmpeg_path": "/opt/ffmpeg", "max_name_len": 64}"#,
        )
        .expect("flat config should parse");
        assert_eq!(config.work_dir(), &PathBuf::from("/var/stage"));
        assert_eq!(config.tools.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(config.naming.max_name_len, 64);
    }

    #[test]
    fn serialization_round_trips() {
        let config = Config::default();
        let json = serde_json::to_string(&config).expect("config should serialize");
        let back: Config = serde_json::from_str(&json).expect("config should round-trip");
        assert_eq!(back.download.event_buffer, config.download.event_buffer);
        assert_eq!(back.download.work_dir, config.download.work_dir);
    }
}
