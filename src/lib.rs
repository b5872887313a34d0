//! # media-dl
//!
//! Backend library for media download applications: fetch a video or its
//! audio track from a page URL, convert it, and land the finished file in
//! a destination directory, with normalized progress reporting and
//! cooperative cancellation.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Single-flight** - One operation at a time; starting a second one
//!   fails fast instead of queueing
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to a progress stream, no
//!   polling required
//! - **Frontend-agnostic** - [`ObserverState`] derives start/cancel
//!   gating and status text for any UI toolkit
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_dl::{
//!     CliMediaSource, Config, OperationRequest, OperationRunner, OutputSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let source = CliMediaSource::from_config(&config.tools)
//!         .ok_or("yt-dlp not found")?;
//!     let runner = OperationRunner::new(config, Arc::new(source)).await?;
//!
//!     // Subscribe to progress events
//!     let mut events = runner.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let handle = runner
//!         .start(OperationRequest {
//!             source: "https://www.youtube.com/watch?v=example".to_string(),
//!             dest_dir: "/home/user/Music".into(),
//!             output: OutputSpec::Audio,
//!             filename_override: None,
//!         })
//!         .await?;
//!     println!("started operation {}", handle.id());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded metadata cache
pub mod cache;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Progress observation and UI-state derivation
pub mod observer;
/// Core operation runner (decomposed into focused submodules)
pub mod runner;
/// Media backend abstraction and the yt-dlp implementation
pub mod source;
/// ffmpeg-based conversion
pub mod transcode;
/// Core types and events
pub mod types;
/// Utility functions
pub mod util;

// Re-export commonly used types
pub use cache::ResolveCache;
pub use config::{Config, DownloadConfig, NamingConfig, ToolsConfig};
pub use error::{Error, ErrorKind, Result};
pub use observer::{ObserverState, Outcome, ProgressObserver, forward_events};
pub use runner::OperationRunner;
pub use source::{CliMediaSource, MediaSource, ProgressSink, RawPhase, RawProgress};
pub use transcode::Transcoder;
pub use types::{
    Container, FormatDescriptor, MediaMetadata, OperationHandle, OperationId, OperationInfo,
    OperationRequest, OutputSpec, Phase, ProgressEvent,
};
