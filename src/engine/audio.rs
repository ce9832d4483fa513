//! Audio render stage
//!
//! Cuts the requested window out of the decoded stereo source (already at the
//! output rate), silence-pads it to the full export duration, then slices it
//! into fixed-length interleaved blocks for the encoder.

use tracing::debug;

use crate::domain::errors::DomainError;
use crate::domain::model::{AudioSampleBlock, DecodedAudio};
use crate::domain::rules::{audio_sample_count, sample_offset_micros};

const OUTPUT_CHANNELS: u16 = 2;

/// Rendered stereo window, planar
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub sample_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl RenderedAudio {
    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        self.left.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioRenderStage {
    sample_rate: u32,
    chunk_frames: usize,
}

impl AudioRenderStage {
    pub fn new(sample_rate: u32, chunk_frames: usize) -> Self {
        Self {
            sample_rate,
            chunk_frames: chunk_frames.max(1),
        }
    }

    /// Render `[start, start + total_duration)` of `decoded`.
    ///
    /// The result always holds exactly `ceil(total_duration * rate)` samples
    /// per channel; anything past the end of the source is silence.
    pub fn render(
        &self,
        decoded: &DecodedAudio,
        start_seconds: f64,
        total_duration_seconds: f64,
    ) -> Result<RenderedAudio, DomainError> {
        if decoded.sample_rate != self.sample_rate {
            return Err(DomainError::AudioStageFailure(format!(
                "Decoded audio is {} Hz, expected {} Hz",
                decoded.sample_rate, self.sample_rate
            )));
        }
        let [left_src, right_src] = decoded.channels.as_slice() else {
            return Err(DomainError::AudioStageFailure(format!(
                "Decoded audio has {} channels, expected stereo",
                decoded.channels.len()
            )));
        };

        let total = audio_sample_count(total_duration_seconds, self.sample_rate) as usize;
        let offset = (start_seconds.max(0.0) * self.sample_rate as f64).round() as usize;

        let left = window(left_src, offset, total);
        let right = window(right_src, offset, total);

        debug!(
            offset,
            available = decoded.frame_count().saturating_sub(offset),
            frames = total,
            "Rendered audio window"
        );

        Ok(RenderedAudio {
            sample_rate: self.sample_rate,
            left,
            right,
        })
    }

    /// Split into interleaved blocks timestamped from their sample offset
    pub fn blocks<'a>(&self, rendered: &'a RenderedAudio) -> AudioBlocks<'a> {
        AudioBlocks {
            rendered,
            chunk_frames: self.chunk_frames,
            offset: 0,
        }
    }
}

/// Iterator over fixed-length interleaved blocks of a rendered window
pub struct AudioBlocks<'a> {
    rendered: &'a RenderedAudio,
    chunk_frames: usize,
    offset: usize,
}

impl AudioBlocks<'_> {
    /// Sample offset of the next block
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for AudioBlocks<'_> {
    type Item = AudioSampleBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.rendered.frame_count();
        if self.offset >= total {
            return None;
        }

        let end = (self.offset + self.chunk_frames).min(total);
        let mut samples = Vec::with_capacity((end - self.offset) * OUTPUT_CHANNELS as usize);
        for i in self.offset..end {
            samples.push(self.rendered.left[i]);
            samples.push(self.rendered.right[i]);
        }

        let block = AudioSampleBlock {
            channel_count: OUTPUT_CHANNELS,
            sample_rate: self.rendered.sample_rate,
            frame_count: end - self.offset,
            samples,
            timestamp_micros: sample_offset_micros(self.offset as u64, self.rendered.sample_rate),
        };
        self.offset = end;
        Some(block)
    }
}

/// `len` samples from `offset`, zero-filled past the end of `source`
fn window(source: &[f32], offset: usize, len: usize) -> Vec<f32> {
    let available = source.get(offset..).unwrap_or(&[]);
    let copied = available.len().min(len);
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&available[..copied]);
    out.resize(len, 0.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;

    fn stage() -> AudioRenderStage {
        AudioRenderStage::new(44_100, 22_050)
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_render_length_covers_padded_duration() {
        let decoded = DecodedAudio {
            sample_rate: 44_100,
            channels: vec![vec![0.25; 44_100 * 30]; 2],
        };
        let rendered = stage().render(&decoded, 10.0, 11.0).unwrap();
        assert_eq!(rendered.frame_count(), 485_100);
        assert_eq!(rendered.right.len(), 485_100);
    }

    #[test]
    fn test_short_source_is_silence_padded() {
        let decoded = DecodedAudio {
            sample_rate: 44_100,
            channels: vec![vec![0.5; 44_100]; 2],
        };
        let rendered = stage().render(&decoded, 0.5, 2.0).unwrap();
        assert_eq!(rendered.frame_count(), 88_200);
        assert_eq!(rendered.left[0], 0.5);
        assert_eq!(rendered.left[22_049], 0.5);
        assert_eq!(rendered.left[22_050], 0.0);
        assert_eq!(rendered.right[88_199], 0.0);
    }

    #[test]
    fn test_window_starts_at_requested_offset() {
        let decoded = DecodedAudio {
            sample_rate: 44_100,
            channels: vec![ramp(44_100 * 2), ramp(44_100 * 2)],
        };
        let rendered = stage().render(&decoded, 1.0, 0.5).unwrap();
        assert_eq!(rendered.left[0], 44_100.0);
        assert_eq!(rendered.left[10], 44_110.0);
    }

    #[test]
    fn test_window_past_source_end_is_silence() {
        let decoded = DecodedAudio {
            sample_rate: 44_100,
            channels: vec![vec![0.3; 100], vec![0.3; 100]],
        };
        let rendered = stage().render(&decoded, 5.0, 0.01).unwrap();
        assert_eq!(rendered.frame_count(), 441);
        assert!(rendered.left.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rate_mismatch_is_audio_failure() {
        let decoded = DecodedAudio {
            sample_rate: 48_000,
            channels: vec![vec![0.0; 100], vec![0.0; 100]],
        };
        let err = stage().render(&decoded, 0.0, 0.001).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioStageFailure);
    }

    #[test]
    fn test_non_stereo_is_audio_failure() {
        for channels in [Vec::new(), vec![vec![0.3; 100]]] {
            let decoded = DecodedAudio {
                sample_rate: 44_100,
                channels,
            };
            let err = stage().render(&decoded, 0.0, 1.0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AudioStageFailure);
        }
    }

    #[test]
    fn test_blocks_are_interleaved_and_timestamped_by_offset() {
        let rendered = RenderedAudio {
            sample_rate: 44_100,
            left: vec![1.0; 50_000],
            right: vec![-1.0; 50_000],
        };
        let blocks: Vec<_> = stage().blocks(&rendered).collect();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].frame_count, 22_050);
        assert_eq!(blocks[0].samples[..4], [1.0, -1.0, 1.0, -1.0]);
        assert_eq!(blocks[1].timestamp_micros, 500_000);
        assert_eq!(blocks[2].frame_count, 50_000 - 44_100);
        assert_eq!(blocks[2].timestamp_micros, 1_000_000);
        let total: usize = blocks.iter().map(|b| b.frame_count).sum();
        assert_eq!(total, 50_000);
    }
}
