// Domain rules - Frame counting, keyframe and progress policies

use crate::domain::errors::DomainError;
use crate::domain::model::MICROS_PER_SECOND;

/// Share of the progress bar covered by the video phase
pub const VIDEO_PROGRESS_SPAN: u8 = 80;
/// Progress reported when the audio phase begins
pub const AUDIO_PROGRESS_START: u8 = 85;
/// Share of the progress bar covered by the audio phase
pub const AUDIO_PROGRESS_SPAN: u8 = 15;

/// `ceil`, ignoring floating-point noise just above an integer
/// (`0.1 * 30.0` is `3.0000000000000004`, which must count as 3 frames)
pub fn ceil_tolerant(value: f64) -> u64 {
    if value <= 0.0 {
        return 0;
    }
    let rounded = value.round();
    if (value - rounded).abs() <= 1e-9 * value.max(1.0) {
        rounded as u64
    } else {
        value.ceil() as u64
    }
}

/// Layout of the output frame sequence for one export
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlan {
    content_frames: u64,
    padding_frames: u64,
    keyframe_interval: u64,
    frame_rate: u32,
}

impl FramePlan {
    /// Plan `ceil(duration * frame_rate)` content frames plus the padding tail
    pub fn new(
        duration_seconds: f64,
        frame_rate: u32,
        padding_frames: u64,
        keyframe_interval: u64,
    ) -> Result<Self, DomainError> {
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(DomainError::InvalidRequest(format!(
                "Duration must be positive, got {}",
                duration_seconds
            )));
        }
        if frame_rate == 0 || keyframe_interval == 0 {
            return Err(DomainError::Internal(
                "Frame rate and keyframe interval must be positive".to_string(),
            ));
        }

        let content_frames = ceil_tolerant(duration_seconds * frame_rate as f64).max(1);

        Ok(Self {
            content_frames,
            padding_frames,
            keyframe_interval,
            frame_rate,
        })
    }

    pub fn content_frames(&self) -> u64 {
        self.content_frames
    }

    pub fn padding_frames(&self) -> u64 {
        self.padding_frames
    }

    pub fn total_frames(&self) -> u64 {
        self.content_frames + self.padding_frames
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Keyframe at index 0, every `keyframe_interval` frames, and on the last frame
    pub fn is_keyframe(&self, index: u64) -> bool {
        index % self.keyframe_interval == 0 || index + 1 == self.total_frames()
    }

    /// Frames past the requested end repeat the last drawn image
    pub fn is_padding(&self, index: u64) -> bool {
        index >= self.content_frames
    }

    /// Presentation timestamp derived from the index, never from wall-clock
    pub fn timestamp_micros(&self, index: u64) -> i64 {
        (index as f64 * MICROS_PER_SECOND / self.frame_rate as f64).round() as i64
    }

    pub fn frame_duration_micros(&self) -> i64 {
        (MICROS_PER_SECOND / self.frame_rate as f64).round() as i64
    }

    /// Source time to sample for `index` when the clip starts at `start_seconds`
    pub fn target_time(&self, start_seconds: f64, index: u64) -> f64 {
        start_seconds + index as f64 / self.frame_rate as f64
    }

    /// Progress during the video phase, measured against content frames only
    pub fn video_progress(&self, index: u64) -> u8 {
        let ratio = index as f64 / self.content_frames as f64;
        let percent = (ratio * VIDEO_PROGRESS_SPAN as f64).round();
        percent.min(VIDEO_PROGRESS_SPAN as f64) as u8
    }

    /// Total media duration including padding.
    ///
    /// Also sizes the audio track, so audio ends exactly where the last
    /// video frame does even when the request is not a whole number of frames.
    pub fn media_duration_seconds(&self) -> f64 {
        self.total_frames() as f64 / self.frame_rate as f64
    }

    /// Duration of real content as represented by whole frames
    pub fn content_duration_seconds(&self) -> f64 {
        self.content_frames as f64 / self.frame_rate as f64
    }
}

/// Samples per channel needed to cover `duration_seconds` at `sample_rate`
pub fn audio_sample_count(duration_seconds: f64, sample_rate: u32) -> u64 {
    ceil_tolerant(duration_seconds * sample_rate as f64)
}

/// Timestamp of a sample offset, independent of the video clock
pub fn sample_offset_micros(offset_samples: u64, sample_rate: u32) -> i64 {
    (offset_samples as f64 / sample_rate as f64 * MICROS_PER_SECOND).round() as i64
}

/// Progress during the audio phase
pub fn audio_progress(offset_samples: u64, total_samples: u64) -> u8 {
    if total_samples == 0 {
        return AUDIO_PROGRESS_START + AUDIO_PROGRESS_SPAN;
    }
    let ratio = (offset_samples as f64 / total_samples as f64).min(1.0);
    AUDIO_PROGRESS_START + (ratio * AUDIO_PROGRESS_SPAN as f64).round() as u8
}
