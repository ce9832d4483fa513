// Ports - Interface definitions (contracts)

use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Port for a seekable, drawable view over the source media.
///
/// Each export opens its own source; implementations are never shared
/// between concurrent exports.
#[async_trait]
pub trait FrameSourcePort: Send + Sync {
    /// Read dimensions and duration; fails with `InvalidSource` if unusable
    async fn load_metadata(&mut self) -> Result<SourceMetadata, DomainError>;

    /// Start seeking to `seconds`; completion is signalled asynchronously
    fn request_seek(&mut self, seconds: f64);

    /// Resolves once the most recent seek has landed
    async fn seek_completed(&self);

    /// Resolves once a decoded frame for the current position is available
    async fn frame_available(&self);

    /// Whether anything is currently drawable
    fn has_decodable_frame(&self) -> bool;

    /// Draw the current decoded frame into `surface`, scaling as needed
    fn draw_into(&mut self, surface: &mut Surface) -> Result<(), DomainError>;

    /// Release decoder resources; further calls are no-ops
    fn release(&mut self);
}

/// Receiver of encoded chunks, normally the muxer
pub trait ChunkSink: Send {
    fn accept(&mut self, chunk: EncodedChunk) -> Result<(), DomainError>;
}

impl ChunkSink for Vec<EncodedChunk> {
    fn accept(&mut self, chunk: EncodedChunk) -> Result<(), DomainError> {
        self.push(chunk);
        Ok(())
    }
}

/// Port for the video encoder
pub trait VideoEncoderPort: Send {
    /// Encode one frame; compressed output is pushed into `sink` as it appears
    fn encode(&mut self, frame: &FrameUnit<'_>, sink: &mut dyn ChunkSink)
        -> Result<(), DomainError>;

    /// Drain buffered frames
    fn flush(&mut self, sink: &mut dyn ChunkSink) -> Result<(), DomainError>;

    fn close(&mut self);
}

/// Port for decoding the whole source audio track
#[async_trait]
pub trait AudioDecodePort: Send {
    /// Decode every sample of the first audio track, resampled to stereo planar
    /// float at the rate the decoder was created with.
    /// Fails with `AudioStageFailure` when there is no audio track.
    async fn decode_all(&mut self) -> Result<DecodedAudio, DomainError>;
}

/// Port for the audio encoder
pub trait AudioEncoderPort: Send {
    fn encode(&mut self, block: &AudioSampleBlock, sink: &mut dyn ChunkSink)
        -> Result<(), DomainError>;

    fn flush(&mut self, sink: &mut dyn ChunkSink) -> Result<(), DomainError>;

    fn close(&mut self);
}

/// Port for the container muxer
#[async_trait]
pub trait MuxerPort: Send {
    /// Accept a chunk for either track, in any interleaving
    fn accept(&mut self, chunk: EncodedChunk) -> Result<(), DomainError>;

    /// Drop a declared track and everything received for it
    fn discard_track(&mut self, track: TrackKind);

    /// Serialize the container; only called after every encoder has closed
    async fn finalize(&mut self) -> Result<Vec<u8>, DomainError>;

    /// Throw away everything buffered so far
    fn abort(&mut self);
}

impl ChunkSink for Box<dyn MuxerPort> {
    fn accept(&mut self, chunk: EncodedChunk) -> Result<(), DomainError> {
        MuxerPort::accept(&mut **self, chunk)
    }
}

/// Creates a fresh set of collaborators for one export
pub trait PipelineFactory: Send + Sync {
    fn open_source(&self, source: &Path) -> Result<Box<dyn FrameSourcePort>, DomainError>;

    fn create_video_encoder(
        &self,
        config: &VideoEncoderConfig,
    ) -> Result<Box<dyn VideoEncoderPort>, DomainError>;

    fn create_audio_decoder(
        &self,
        source: &Path,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioDecodePort>, DomainError>;

    fn create_audio_encoder(
        &self,
        config: &AudioEncoderConfig,
    ) -> Result<Box<dyn AudioEncoderPort>, DomainError>;

    fn create_muxer(&self, config: &MuxerConfig) -> Result<Box<dyn MuxerPort>, DomainError>;
}
