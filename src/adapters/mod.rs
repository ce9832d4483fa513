// Adapters - External system implementations

pub mod libav_audio;
pub mod libav_mux;
pub mod libav_source;
pub mod libav_video;

use std::path::Path;

pub use libav_audio::{LibavAudioDecoder, LibavAudioEncoder};
pub use libav_mux::LibavMuxer;
pub use libav_source::LibavFrameSource;
pub use libav_video::LibavVideoEncoder;

use crate::domain::errors::DomainError;
use crate::domain::model::{AudioEncoderConfig, MuxerConfig, VideoEncoderConfig};
use crate::error::ClipperResult;
use crate::ports::*;

/// Pipeline factory backed by the linked FFmpeg libraries
#[derive(Debug, Clone, Copy)]
pub struct LibavPipeline;

impl LibavPipeline {
    /// Initialize FFmpeg and return the factory
    pub fn new() -> ClipperResult<Self> {
        crate::init()?;
        Ok(Self)
    }
}

impl PipelineFactory for LibavPipeline {
    fn open_source(&self, source: &Path) -> Result<Box<dyn FrameSourcePort>, DomainError> {
        if !source.is_file() {
            return Err(DomainError::InvalidSource(format!(
                "{} is not a readable file",
                source.display()
            )));
        }
        Ok(Box::new(LibavFrameSource::new(source)))
    }

    fn create_video_encoder(
        &self,
        config: &VideoEncoderConfig,
    ) -> Result<Box<dyn VideoEncoderPort>, DomainError> {
        Ok(Box::new(LibavVideoEncoder::new(config)?))
    }

    fn create_audio_decoder(
        &self,
        source: &Path,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioDecodePort>, DomainError> {
        Ok(Box::new(LibavAudioDecoder::new(source, sample_rate)))
    }

    fn create_audio_encoder(
        &self,
        config: &AudioEncoderConfig,
    ) -> Result<Box<dyn AudioEncoderPort>, DomainError> {
        Ok(Box::new(LibavAudioEncoder::new(config)?))
    }

    fn create_muxer(&self, config: &MuxerConfig) -> Result<Box<dyn MuxerPort>, DomainError> {
        Ok(Box::new(LibavMuxer::new(config)))
    }
}
