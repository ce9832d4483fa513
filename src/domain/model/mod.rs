// Domain models - Core types and data structures

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, ExportWarning};
use crate::utils::time::parse_time;

/// Output frame rate policy
pub const FRAME_RATE: u32 = 30;
/// Trailing freeze-frames appended after the requested content
pub const PADDING_FRAMES: u64 = 30;
/// Distance between forced keyframes
pub const KEYFRAME_INTERVAL: u64 = 30;
/// Output audio sample rate
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
/// Output audio channel count (stereo)
pub const AUDIO_CHANNELS: u16 = 2;
/// Length of one audio block handed to the encoder
pub const AUDIO_CHUNK_SECONDS: f64 = 0.5;

pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// An immutable request to export `[start, end)` of a source file
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    source: PathBuf,
    start_seconds: f64,
    end_seconds: f64,
}

impl ClipRequest {
    /// Create a new request, rejecting empty or inverted windows
    pub fn new(
        source: impl Into<PathBuf>,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Result<Self, DomainError> {
        if !start_seconds.is_finite() || !end_seconds.is_finite() {
            return Err(DomainError::InvalidRequest(
                "Start and end must be finite numbers".to_string(),
            ));
        }
        if start_seconds < 0.0 {
            return Err(DomainError::InvalidRequest(format!(
                "Start time cannot be negative ({:.3}s)",
                start_seconds
            )));
        }
        if end_seconds <= start_seconds {
            return Err(DomainError::InvalidRequest(format!(
                "End ({:.3}s) must be after start ({:.3}s)",
                end_seconds, start_seconds
            )));
        }

        Ok(Self {
            source: source.into(),
            start_seconds,
            end_seconds,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn start_seconds(&self) -> f64 {
        self.start_seconds
    }

    pub fn end_seconds(&self) -> f64 {
        self.end_seconds
    }

    /// Requested content duration in seconds, always positive
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Raw properties reported by a frame source before validation
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

/// Validated properties the pipeline is configured from
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProperties {
    /// Even-adjusted output width
    pub width: u32,
    /// Even-adjusted output height
    pub height: u32,
    pub natural_duration_seconds: f64,
    pub frame_rate: u32,
}

impl MediaProperties {
    /// Derive output properties from source metadata
    pub fn from_metadata(metadata: &SourceMetadata, frame_rate: u32) -> Result<Self, DomainError> {
        let width = even_floor(metadata.width);
        let height = even_floor(metadata.height);

        if width == 0 || height == 0 {
            return Err(DomainError::InvalidSource(format!(
                "Unusable video dimensions {}x{}",
                metadata.width, metadata.height
            )));
        }
        if !metadata.duration_seconds.is_finite() || metadata.duration_seconds <= 0.0 {
            return Err(DomainError::InvalidSource(format!(
                "Unusable source duration {}",
                metadata.duration_seconds
            )));
        }
        if frame_rate == 0 {
            return Err(DomainError::Internal("Frame rate must be positive".to_string()));
        }

        Ok(Self {
            width,
            height,
            natural_duration_seconds: metadata.duration_seconds,
            frame_rate,
        })
    }

    /// Duration of one output frame in microseconds
    pub fn frame_duration_micros(&self) -> f64 {
        MICROS_PER_SECOND / self.frame_rate as f64
    }
}

/// Round a dimension down to the nearest even value (AVC macroblock alignment)
pub fn even_floor(value: u32) -> u32 {
    value - (value % 2)
}

/// The working drawing surface, stored as planar YUV 4:2:0
#[derive(Clone, PartialEq)]
pub struct Surface {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// A plane of a [`Surface`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Y,
    U,
    V,
}

impl Surface {
    /// Allocate a surface; dimensions must be even and non-zero
    pub fn new(width: u32, height: u32) -> Result<Self, DomainError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(DomainError::Internal(format!(
                "Surface dimensions must be even and non-zero, got {}x{}",
                width, height
            )));
        }
        let luma = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            data: vec![0; luma + luma / 2],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width in bytes of one row of the given plane
    pub fn plane_width(&self, plane: Plane) -> usize {
        match plane {
            Plane::Y => self.width as usize,
            Plane::U | Plane::V => self.width as usize / 2,
        }
    }

    /// Number of rows in the given plane
    pub fn plane_height(&self, plane: Plane) -> usize {
        match plane {
            Plane::Y => self.height as usize,
            Plane::U | Plane::V => self.height as usize / 2,
        }
    }

    fn plane_range(&self, plane: Plane) -> std::ops::Range<usize> {
        let luma = self.width as usize * self.height as usize;
        let chroma = luma / 4;
        match plane {
            Plane::Y => 0..luma,
            Plane::U => luma..luma + chroma,
            Plane::V => luma + chroma..luma + 2 * chroma,
        }
    }

    pub fn plane(&self, plane: Plane) -> &[u8] {
        let range = self.plane_range(plane);
        &self.data[range]
    }

    pub fn plane_mut(&mut self, plane: Plane) -> &mut [u8] {
        let range = self.plane_range(plane);
        &mut self.data[range]
    }

    /// Copy a strided source plane into this surface, row by row
    pub fn copy_plane_from(
        &mut self,
        plane: Plane,
        source: &[u8],
        source_stride: usize,
    ) -> Result<(), DomainError> {
        let row = self.plane_width(plane);
        let rows = self.plane_height(plane);
        if source_stride < row || source.len() < source_stride * (rows - 1) + row {
            return Err(DomainError::FrameCaptureFailure(format!(
                "Source plane {:?} too small: {} bytes at stride {}",
                plane,
                source.len(),
                source_stride
            )));
        }

        let target = self.plane_mut(plane);
        for y in 0..rows {
            let src = &source[y * source_stride..y * source_stride + row];
            target[y * row..(y + 1) * row].copy_from_slice(src);
        }
        Ok(())
    }

    /// Fill the whole surface with an RGB colour (BT.601, limited range)
    pub fn fill_rgb(&mut self, rgb: [u8; 3]) {
        let (y, u, v) = rgb_to_yuv(rgb);
        self.plane_mut(Plane::Y).fill(y);
        self.plane_mut(Plane::U).fill(u);
        self.plane_mut(Plane::V).fill(v);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let y = 16.0 + (65.481 * r + 128.553 * g + 24.966 * b) / 255.0;
    let u = 128.0 + (-37.797 * r - 74.203 * g + 112.0 * b) / 255.0;
    let v = 128.0 + (112.0 * r - 93.786 * g - 18.214 * b) / 255.0;
    let clamp = |x: f64| x.round().clamp(0.0, 255.0) as u8;
    (clamp(y), clamp(u), clamp(v))
}

/// One sampled frame on its way to the video encoder.
///
/// The image is borrowed from the sampler's working surface, so a frame
/// cannot outlive the encode call it is handed to.
#[derive(Debug, Clone, Copy)]
pub struct FrameUnit<'a> {
    pub index: u64,
    pub presentation_timestamp_micros: i64,
    pub is_keyframe: bool,
    pub image: &'a Surface,
}

/// Track an encoded chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Decoder configuration emitted alongside the first chunk of a track
#[derive(Debug, Clone, PartialEq)]
pub struct CodecMetadata {
    /// Codec string, e.g. `avc1.42001f` or `mp4a.40.2`
    pub codec: String,
    /// Out-of-band decoder configuration (avcC / AudioSpecificConfig)
    pub description: Vec<u8>,
}

/// A compressed access unit produced by an encoder
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub track: TrackKind,
    pub timestamp_micros: i64,
    pub duration_micros: i64,
    pub is_key: bool,
    pub payload: Vec<u8>,
    pub metadata: Option<CodecMetadata>,
}

/// A block of interleaved float samples fed to the audio encoder
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleBlock {
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Samples per channel
    pub frame_count: usize,
    /// Interleaved samples, `frame_count * channel_count` long
    pub samples: Vec<f32>,
    pub timestamp_micros: i64,
}

/// Fully decoded source audio, planar float (one `Vec` per channel)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Video encoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub codec: String,
    /// H.264 profile name (`baseline`, `main` or `high`)
    pub profile: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub frame_rate: u32,
    pub keyframe_interval: u64,
    /// Favour compression efficiency over latency
    pub quality_latency: bool,
}

/// Audio encoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bitrate: u64,
}

/// Track declarations handed to the muxer up front
#[derive(Debug, Clone, PartialEq)]
pub struct MuxerConfig {
    pub video_width: u32,
    pub video_height: u32,
    pub frame_rate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    /// Place the index before the media data
    pub fast_start: bool,
}

/// Snapshot of export progress as seen by observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    /// 0..=100, never decreasing within one export
    pub percent: u8,
    pub current_task: String,
    pub error: Option<String>,
}

impl Default for ExportProgress {
    fn default() -> Self {
        Self {
            percent: 0,
            current_task: "Idle".to_string(),
            error: None,
        }
    }
}

/// States of the export orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportState {
    Idle,
    Initializing,
    EncodingVideo,
    EncodingAudio,
    Finalizing,
    Done,
    Failed(crate::domain::errors::ErrorKind),
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Done | ExportState::Failed(_) | ExportState::Cancelled)
    }

    /// Label reported as the current task while in this state
    pub fn task_label(&self) -> &'static str {
        match self {
            ExportState::Idle => "Idle",
            ExportState::Initializing => "Loading source",
            ExportState::EncodingVideo => "Encoding video",
            ExportState::EncodingAudio => "Processing audio",
            ExportState::Finalizing => "Finalizing container",
            ExportState::Done => "Done",
            ExportState::Failed(_) => "Failed",
            ExportState::Cancelled => "Cancelled",
        }
    }
}

/// Result of a successful export
#[derive(Debug, Clone)]
pub struct ExportOutput {
    /// Serialized MP4 container
    pub bytes: Vec<u8>,
    /// Recoverable failures encountered along the way
    pub warnings: Vec<ExportWarning>,
    pub content_frames: u64,
    pub total_frames: u64,
    /// Samples per channel handed to the audio encoder, `None` for video-only output
    pub audio_frames: Option<u64>,
    /// Content duration plus padding
    pub media_duration_seconds: f64,
}

impl ExportOutput {
    pub fn has_audio(&self) -> bool {
        self.audio_frames.is_some()
    }
}

/// One record of the externally produced annotation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSegment {
    pub title: String,
    /// `MM:SS`, `HH:MM:SS` or `SS`
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub description: String,
}

impl ClipSegment {
    /// Build an export request for this segment of `source`
    pub fn to_request(&self, source: impl Into<PathBuf>) -> Result<ClipRequest, DomainError> {
        let start = parse_time(&self.start).map_err(|e| {
            DomainError::InvalidRequest(format!("Segment '{}' start: {}", self.title, e))
        })?;
        let end = parse_time(&self.end).map_err(|e| {
            DomainError::InvalidRequest(format!("Segment '{}' end: {}", self.title, e))
        })?;
        ClipRequest::new(source, start, end)
    }
}

#[cfg(test)]
mod tests;
