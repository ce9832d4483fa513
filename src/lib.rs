//! Clipforge Video Sub-Clip Exporter Library
//!
//! Exports a time range of a source video as a self-contained, fast-start MP4
//! (H.264 baseline video, AAC-LC stereo audio). Frames are sampled at a fixed
//! rate by seeking the source, a freeze-frame tail is appended, and the audio
//! window is re-rendered to stereo 44.1 kHz before everything is muxed in
//! memory.
//!
//! ```no_run
//! use std::sync::Arc;
//! use clipforge::{export_clip, LibavPipeline};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = Arc::new(LibavPipeline::new()?);
//! let output = export_clip(factory, "talk.mp4", 10.0, 20.0, |p| println!("{p}%")).await?;
//! std::fs::write("clip.mp4", &output.bytes)?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod app;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use adapters::LibavPipeline;
pub use app::{export_clip, ExportInteractor};
pub use config::ExportConfig;
pub use domain::errors::{DomainError, ErrorKind, ExportWarning};
pub use domain::model::{
    ClipRequest, ClipSegment, ExportOutput, ExportProgress, ExportState, MediaProperties,
};
pub use domain::rules::FramePlan;
pub use engine::{JsonProgressCallback, ProgressCallback, ProgressTracker};
pub use error::{ClipperError, ClipperResult};

/// Initialize the FFmpeg libraries
pub fn init() -> ClipperResult<()> {
    ffmpeg_next::init().map_err(|e| ClipperError::FFmpegInitError {
        message: e.to_string(),
    })?;

    Ok(())
}
