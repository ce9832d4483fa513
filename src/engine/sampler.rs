//! Frame sampler: turns a target source time into one drawn image
//!
//! Every call resolves within the configured seek timeout. Targets past the
//! requested content or past the end of the source never seek; they repeat
//! the last drawn image, which is how the padding tail is produced.

use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::errors::{DomainError, ExportWarning};
use crate::domain::model::{FrameUnit, MediaProperties, Surface};
use crate::domain::rules::FramePlan;
use crate::ports::FrameSourcePort;

/// Which signal ended a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    SeekCompleted,
    FrameAvailable,
    TimedOut,
}

/// How the image for a frame was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Freshly drawn from the source
    Drawn,
    /// Previous image repeated (padding, past source end, or nothing new decodable)
    Frozen,
    /// Fallback colour, either nothing drawn yet or the draw failed
    Fallback,
}

/// Result of sampling one output frame
#[derive(Debug)]
pub struct SampledFrame<'a> {
    pub unit: FrameUnit<'a>,
    pub outcome: SampleOutcome,
    pub warning: Option<ExportWarning>,
}

pub struct FrameSampler {
    source: Box<dyn FrameSourcePort>,
    surface: Surface,
    natural_duration: f64,
    seek_timeout: Duration,
    fallback_color: [u8; 3],
    has_drawn: bool,
    released: bool,
}

impl FrameSampler {
    /// Wrap an opened source; the working surface starts filled with the fallback colour
    pub fn new(
        mut source: Box<dyn FrameSourcePort>,
        props: &MediaProperties,
        seek_timeout: Duration,
        fallback_color: [u8; 3],
    ) -> Result<Self, DomainError> {
        let mut surface = match Surface::new(props.width, props.height) {
            Ok(surface) => surface,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };
        surface.fill_rgb(fallback_color);

        Ok(Self {
            source,
            surface,
            natural_duration: props.natural_duration_seconds,
            seek_timeout,
            fallback_color,
            has_drawn: false,
            released: false,
        })
    }

    /// Seek to the clip start ahead of the frame loop so frame 0 is usually decodable
    pub async fn preload(&mut self, start_seconds: f64, limit: Duration) -> ReadySignal {
        let target = start_seconds.clamp(0.0, self.natural_duration);
        self.source.request_seek(target);
        let signal = self.wait_until_ready(limit).await;
        debug!(target_seconds = target, ?signal, "Preload finished");
        signal
    }

    /// Produce the image for output frame `index`, sampled at `target_seconds`
    pub async fn sample(
        &mut self,
        plan: &FramePlan,
        index: u64,
        target_seconds: f64,
    ) -> SampledFrame<'_> {
        let (outcome, warning) = if plan.is_padding(index) || target_seconds > self.natural_duration
        {
            (SampleOutcome::Frozen, None)
        } else {
            self.seek_and_draw(index, target_seconds).await
        };

        SampledFrame {
            unit: FrameUnit {
                index,
                presentation_timestamp_micros: plan.timestamp_micros(index),
                is_keyframe: plan.is_keyframe(index),
                image: &self.surface,
            },
            outcome,
            warning,
        }
    }

    async fn seek_and_draw(
        &mut self,
        index: u64,
        target_seconds: f64,
    ) -> (SampleOutcome, Option<ExportWarning>) {
        let target = target_seconds.clamp(0.0, self.natural_duration);
        self.source.request_seek(target);

        if self.wait_until_ready(self.seek_timeout).await == ReadySignal::TimedOut {
            debug!(frame = index, target_seconds = target, "Seek timed out, using current frame");
        }

        if !self.source.has_decodable_frame() {
            return if self.has_drawn {
                (SampleOutcome::Frozen, None)
            } else {
                (SampleOutcome::Fallback, None)
            };
        }

        match self.source.draw_into(&mut self.surface) {
            Ok(()) => {
                self.has_drawn = true;
                (SampleOutcome::Drawn, None)
            }
            Err(e) => {
                warn!(frame = index, error = %e, "Frame draw failed, substituting fallback colour");
                self.surface.fill_rgb(self.fallback_color);
                let e = match e {
                    DomainError::FrameCaptureFailure(_) => e,
                    other => DomainError::FrameCaptureFailure(other.to_string()),
                };
                (SampleOutcome::Fallback, Some(e.into_warning(Some(index))))
            }
        }
    }

    /// Race seek completion against frame availability, bounded by `limit`
    async fn wait_until_ready(&self, limit: Duration) -> ReadySignal {
        let source = self.source.as_ref();
        let ready = async {
            tokio::select! {
                _ = source.seek_completed() => ReadySignal::SeekCompleted,
                _ = source.frame_available() => ReadySignal::FrameAvailable,
            }
        };

        tokio::time::timeout(limit, ready)
            .await
            .unwrap_or(ReadySignal::TimedOut)
    }

    /// Release the source; safe to call more than once
    pub fn release(&mut self) {
        if !self.released {
            self.source.release();
            self.released = true;
            debug!("Frame source released");
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::domain::errors::ErrorKind;
    use crate::domain::model::{Plane, SourceMetadata};

    /// Source whose drawn luma value is the seek target in whole seconds
    struct ScriptedSource {
        position: f64,
        ready: bool,
        hang: bool,
        fail_draws: bool,
        seeks: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                position: 0.0,
                ready: true,
                hang: false,
                fail_draws: false,
                seeks: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FrameSourcePort for ScriptedSource {
        async fn load_metadata(&mut self) -> Result<SourceMetadata, DomainError> {
            Ok(SourceMetadata {
                width: 4,
                height: 2,
                duration_seconds: 5.0,
            })
        }

        fn request_seek(&mut self, seconds: f64) {
            self.position = seconds;
            self.seeks.fetch_add(1, Ordering::SeqCst);
        }

        async fn seek_completed(&self) {
            if self.hang {
                std::future::pending::<()>().await;
            }
        }

        async fn frame_available(&self) {
            std::future::pending::<()>().await;
        }

        fn has_decodable_frame(&self) -> bool {
            self.ready
        }

        fn draw_into(&mut self, surface: &mut Surface) -> Result<(), DomainError> {
            if self.fail_draws {
                return Err(DomainError::Internal("draw exploded".to_string()));
            }
            let luma = self.position as u8;
            surface.plane_mut(Plane::Y).fill(luma);
            Ok(())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn props() -> MediaProperties {
        MediaProperties {
            width: 4,
            height: 2,
            natural_duration_seconds: 5.0,
            frame_rate: 30,
        }
    }

    fn sampler(source: ScriptedSource) -> FrameSampler {
        FrameSampler::new(Box::new(source), &props(), Duration::from_secs(1), [0, 0, 0]).unwrap()
    }

    #[tokio::test]
    async fn test_sample_draws_and_tags_frame() {
        let mut sampler = sampler(ScriptedSource::new());
        let plan = FramePlan::new(1.0, 30, 30, 30).unwrap();

        let frame = sampler.sample(&plan, 0, 3.0).await;
        assert_eq!(frame.outcome, SampleOutcome::Drawn);
        assert!(frame.unit.is_keyframe);
        assert_eq!(frame.unit.presentation_timestamp_micros, 0);
        assert_eq!(frame.unit.image.plane(Plane::Y)[0], 3);
        assert!(frame.warning.is_none());
    }

    #[tokio::test]
    async fn test_padding_frames_freeze_without_seeking() {
        let source = ScriptedSource::new();
        let seeks = source.seeks.clone();
        let mut sampler = sampler(source);
        let plan = FramePlan::new(1.0, 30, 30, 30).unwrap();

        sampler.sample(&plan, 29, 2.0).await;
        let frame = sampler.sample(&plan, 30, 4.0).await;

        assert_eq!(frame.outcome, SampleOutcome::Frozen);
        assert_eq!(frame.unit.image.plane(Plane::Y)[0], 2);
        assert_eq!(seeks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_target_past_source_end_freezes() {
        let source = ScriptedSource::new();
        let seeks = source.seeks.clone();
        let mut sampler = sampler(source);
        let plan = FramePlan::new(10.0, 30, 30, 30).unwrap();

        let frame = sampler.sample(&plan, 5, 6.5).await;
        assert_eq!(frame.outcome, SampleOutcome::Frozen);
        assert_eq!(seeks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_decodable_uses_fallback_colour() {
        let mut source = ScriptedSource::new();
        source.ready = false;
        let mut sampler = sampler(source);
        let plan = FramePlan::new(1.0, 30, 30, 30).unwrap();

        let frame = sampler.sample(&plan, 0, 1.0).await;
        assert_eq!(frame.outcome, SampleOutcome::Fallback);
        assert_eq!(frame.unit.image.plane(Plane::Y)[0], 16);
        assert!(frame.warning.is_none());
    }

    #[tokio::test]
    async fn test_draw_failure_becomes_warning() {
        let mut source = ScriptedSource::new();
        source.fail_draws = true;
        let mut sampler = sampler(source);
        let plan = FramePlan::new(1.0, 30, 30, 30).unwrap();

        let frame = sampler.sample(&plan, 7, 1.0).await;
        assert_eq!(frame.outcome, SampleOutcome::Fallback);
        let warning = frame.warning.unwrap();
        assert_eq!(warning.kind, ErrorKind::FrameCaptureFailure);
        assert_eq!(warning.frame_index, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_seek_resolves_after_timeout() {
        let mut source = ScriptedSource::new();
        source.hang = true;
        let mut sampler = sampler(source);

        let before = tokio::time::Instant::now();
        let signal = sampler.preload(1.0, Duration::from_millis(500)).await;
        assert_eq!(signal, ReadySignal::TimedOut);
        assert!(before.elapsed() >= Duration::from_millis(500));

        let plan = FramePlan::new(1.0, 30, 30, 30).unwrap();
        let frame = sampler.sample(&plan, 0, 1.0).await;
        assert_eq!(frame.outcome, SampleOutcome::Drawn);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let source = ScriptedSource::new();
        let releases = source.releases.clone();
        let mut sampler = sampler(source);
        sampler.release();
        sampler.release();
        drop(sampler);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
