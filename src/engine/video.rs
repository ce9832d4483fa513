//! Video encode stage

use tracing::{debug, warn};

use crate::domain::errors::{DomainError, ExportWarning};
use crate::domain::model::FrameUnit;
use crate::ports::{ChunkSink, VideoEncoderPort};

/// Decide whether a per-unit failure is absorbed as a warning or aborts the export
pub(crate) fn absorb(
    error: DomainError,
    strict: bool,
    frame_index: Option<u64>,
) -> Result<ExportWarning, DomainError> {
    if strict || error.kind().is_fatal_by_default() {
        return Err(error);
    }
    Ok(error.into_warning(frame_index))
}

/// Feeds frames to the video encoder in strictly increasing timestamp order
pub struct VideoEncodeStage {
    encoder: Box<dyn VideoEncoderPort>,
    strict: bool,
    last_timestamp: Option<i64>,
    frames_submitted: u64,
    closed: bool,
}

impl VideoEncodeStage {
    pub fn new(encoder: Box<dyn VideoEncoderPort>, strict: bool) -> Self {
        Self {
            encoder,
            strict,
            last_timestamp: None,
            frames_submitted: 0,
            closed: false,
        }
    }

    /// Encode one frame.
    ///
    /// Encoder errors become a warning unless the stage is strict; a frame
    /// whose timestamp does not advance is an internal error.
    pub fn encode(
        &mut self,
        frame: &FrameUnit<'_>,
        sink: &mut dyn ChunkSink,
    ) -> Result<Option<ExportWarning>, DomainError> {
        if let Some(last) = self.last_timestamp {
            if frame.presentation_timestamp_micros <= last {
                return Err(DomainError::Internal(format!(
                    "Frame {} timestamp {} does not follow {}",
                    frame.index, frame.presentation_timestamp_micros, last
                )));
            }
        }
        self.last_timestamp = Some(frame.presentation_timestamp_micros);
        self.frames_submitted += 1;

        if frame.is_keyframe {
            debug!(frame = frame.index, "Forcing keyframe");
        }

        match self.encoder.encode(frame, sink) {
            Ok(()) => Ok(None),
            Err(e) => {
                let warning = absorb(e, self.strict, Some(frame.index))?;
                warn!(frame = frame.index, "{}", warning);
                Ok(Some(warning))
            }
        }
    }

    /// Flush then close the encoder
    pub fn finish(&mut self, sink: &mut dyn ChunkSink) -> Result<Vec<ExportWarning>, DomainError> {
        let mut warnings = Vec::new();
        let flushed = self.encoder.flush(sink);
        self.close();

        if let Err(e) = flushed {
            let warning = absorb(e, self.strict, None)?;
            warn!("Video flush: {}", warning);
            warnings.push(warning);
        }

        debug!(frames = self.frames_submitted, "Video encoder closed");
        Ok(warnings)
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Close without flushing; safe to call more than once
    pub fn close(&mut self) {
        if !self.closed {
            self.encoder.close();
            self.closed = true;
        }
    }
}

impl Drop for VideoEncodeStage {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use crate::domain::model::{EncodedChunk, Surface, TrackKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEncoder {
        fail_on: Option<u64>,
        closes: Arc<AtomicUsize>,
    }

    impl VideoEncoderPort for CountingEncoder {
        fn encode(
            &mut self,
            frame: &FrameUnit<'_>,
            sink: &mut dyn ChunkSink,
        ) -> Result<(), DomainError> {
            if self.fail_on == Some(frame.index) {
                return Err(DomainError::EncoderFailure("codec hiccup".to_string()));
            }
            sink.accept(EncodedChunk {
                track: TrackKind::Video,
                timestamp_micros: frame.presentation_timestamp_micros,
                duration_micros: 33_333,
                is_key: frame.is_keyframe,
                payload: vec![frame.index as u8],
                metadata: None,
            })
        }

        fn flush(&mut self, _sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
            Ok(())
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unit(surface: &Surface, index: u64, pts: i64) -> FrameUnit<'_> {
        FrameUnit {
            index,
            presentation_timestamp_micros: pts,
            is_keyframe: index == 0,
            image: surface,
        }
    }

    fn stage(fail_on: Option<u64>, strict: bool) -> (VideoEncodeStage, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let encoder = CountingEncoder {
            fail_on,
            closes: closes.clone(),
        };
        (VideoEncodeStage::new(Box::new(encoder), strict), closes)
    }

    #[test]
    fn test_encode_forwards_chunks() {
        let surface = Surface::new(2, 2).unwrap();
        let (mut stage, closes) = stage(None, false);
        let mut sink: Vec<EncodedChunk> = Vec::new();

        stage.encode(&unit(&surface, 0, 0), &mut sink).unwrap();
        stage.encode(&unit(&surface, 1, 33_333), &mut sink).unwrap();
        assert!(stage.finish(&mut sink).unwrap().is_empty());

        assert_eq!(sink.len(), 2);
        assert!(sink[0].is_key);
        assert_eq!(stage.frames_submitted(), 2);
        drop(stage);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encoder_failure_is_a_warning_by_default() {
        let surface = Surface::new(2, 2).unwrap();
        let (mut stage, _) = stage(Some(1), false);
        let mut sink: Vec<EncodedChunk> = Vec::new();

        stage.encode(&unit(&surface, 0, 0), &mut sink).unwrap();
        let warning = stage.encode(&unit(&surface, 1, 33_333), &mut sink).unwrap().unwrap();
        stage.encode(&unit(&surface, 2, 66_667), &mut sink).unwrap();

        assert_eq!(warning.kind, ErrorKind::EncoderFailure);
        assert_eq!(warning.frame_index, Some(1));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_encoder_failure_is_fatal_when_strict() {
        let surface = Surface::new(2, 2).unwrap();
        let (mut stage, _) = stage(Some(0), true);
        let mut sink: Vec<EncodedChunk> = Vec::new();

        let err = stage.encode(&unit(&surface, 0, 0), &mut sink).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncoderFailure);
    }

    #[test]
    fn test_non_increasing_timestamp_rejected() {
        let surface = Surface::new(2, 2).unwrap();
        let (mut stage, _) = stage(None, false);
        let mut sink: Vec<EncodedChunk> = Vec::new();

        stage.encode(&unit(&surface, 0, 100), &mut sink).unwrap();
        let err = stage.encode(&unit(&surface, 1, 100), &mut sink).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
