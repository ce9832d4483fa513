// Export interactor - Orchestrates the clip export use case

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ExportConfig;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::*;
use crate::engine::{
    AudioRenderStage, FnProgressCallback, FrameSampler, ProgressTracker, SampledFrame,
    VideoEncodeStage,
};
use crate::error::ClipperResult;
use crate::ports::*;
use crate::utils::time::format_time;

/// Drives one export at a time through
/// `Idle -> Initializing -> EncodingVideo -> EncodingAudio -> Finalizing -> Done`.
///
/// Every export opens fresh collaborators from the factory and releases them
/// on every exit path.
pub struct ExportInteractor {
    factory: Arc<dyn PipelineFactory>,
    config: ExportConfig,
    tracker: ProgressTracker,
    state: Mutex<ExportState>,
}

/// Handles owned by a running export
struct Pipeline {
    sampler: FrameSampler,
    video: VideoEncodeStage,
    muxer: Box<dyn MuxerPort>,
}

impl ExportInteractor {
    /// Create an interactor with a validated configuration
    pub fn new(factory: Arc<dyn PipelineFactory>, config: ExportConfig) -> ClipperResult<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            config,
            tracker: ProgressTracker::new(),
            state: Mutex::new(ExportState::Idle),
        })
    }

    pub fn with_defaults(factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            factory,
            config: ExportConfig::default(),
            tracker: ProgressTracker::new(),
            state: Mutex::new(ExportState::Idle),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Progress tracker; register callbacks or request cancellation through it
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn progress(&self) -> ExportProgress {
        self.tracker.snapshot()
    }

    pub fn state(&self) -> ExportState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(ExportState::Failed(ErrorKind::Internal))
    }

    /// Export a validated request
    pub async fn export(&self, request: &ClipRequest) -> Result<ExportOutput, DomainError> {
        self.export_range(request.source(), request.start_seconds(), request.end_seconds())
            .await
    }

    /// Export `[start, end)` of `source`
    pub async fn export_range(
        &self,
        source: &Path,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Result<ExportOutput, DomainError> {
        self.begin()?;
        self.tracker.start(ExportState::Initializing.task_label());

        let span = info_span!(
            "export",
            source = %source.display(),
            range = %format!("{}-{}", format_time(start_seconds), format_time(end_seconds))
        );
        let result = self
            .run(source, start_seconds, end_seconds)
            .instrument(span)
            .await;

        match &result {
            Ok(output) => {
                self.transition(ExportState::Done);
                self.tracker.complete(Some(format!(
                    "{} frames, {} bytes",
                    output.total_frames,
                    output.bytes.len()
                )));
                info!(
                    frames = output.total_frames,
                    bytes = output.bytes.len(),
                    warnings = output.warnings.len(),
                    audio = output.has_audio(),
                    "Export finished"
                );
            }
            Err(DomainError::Cancelled) => {
                self.transition(ExportState::Cancelled);
                self.tracker.mark_cancelled();
                info!("Export cancelled");
            }
            Err(e) => {
                self.transition(ExportState::Failed(e.kind()));
                self.tracker.error(&e.to_string());
                error!(kind = %e.kind(), "Export failed: {}", e);
            }
        }
        result
    }

    /// Claim the interactor for a new export
    fn begin(&self) -> Result<(), DomainError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DomainError::Internal("Export state lock poisoned".to_string()))?;
        if !matches!(*state, ExportState::Idle) && !state.is_terminal() {
            return Err(DomainError::Internal(format!(
                "An export is already running ({:?})",
                *state
            )));
        }
        *state = ExportState::Initializing;
        Ok(())
    }

    fn transition(&self, next: ExportState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "State transition");
            *state = next;
        }
    }

    async fn run(
        &self,
        source: &Path,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Result<ExportOutput, DomainError> {
        let request = ClipRequest::new(source, start_seconds, end_seconds)?;
        let plan = FramePlan::new(
            request.duration(),
            self.config.frame_rate,
            self.config.padding_frames,
            self.config.keyframe_interval,
        )?;

        let (mut pipeline, props) = self.initialize(&request).await?;
        info!(
            width = props.width,
            height = props.height,
            source_duration = props.natural_duration_seconds,
            content_frames = plan.content_frames(),
            total_frames = plan.total_frames(),
            "Pipeline initialized"
        );

        let mut warnings = Vec::new();
        let outcome = self
            .encode_and_finalize(&request, &plan, &mut pipeline, &mut warnings)
            .await;

        match outcome {
            Ok((bytes, audio_frames)) => {
                pipeline.sampler.release();
                Ok(ExportOutput {
                    bytes,
                    warnings,
                    content_frames: plan.content_frames(),
                    total_frames: plan.total_frames(),
                    audio_frames,
                    media_duration_seconds: plan.media_duration_seconds(),
                })
            }
            Err(e) => {
                pipeline.muxer.abort();
                pipeline.video.close();
                pipeline.sampler.release();
                Err(e)
            }
        }
    }

    /// Open the source, derive media properties and configure video encoder and muxer
    async fn initialize(
        &self,
        request: &ClipRequest,
    ) -> Result<(Pipeline, MediaProperties), DomainError> {
        let mut source = self.factory.open_source(request.source())?;

        let props = match source.load_metadata().await {
            Ok(metadata) => MediaProperties::from_metadata(&metadata, self.config.frame_rate),
            Err(e) => Err(e),
        };
        let props = match props {
            Ok(props) => props,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };

        let sampler = FrameSampler::new(
            source,
            &props,
            self.config.seek_timeout(),
            self.config.fallback_color,
        )?;
        let encoder = self
            .factory
            .create_video_encoder(&self.config.video_encoder_config(&props))?;
        let video = VideoEncodeStage::new(encoder, self.config.strict);
        let muxer = self
            .factory
            .create_muxer(&self.config.muxer_config(&props))?;

        Ok((
            Pipeline {
                sampler,
                video,
                muxer,
            },
            props,
        ))
    }

    async fn encode_and_finalize(
        &self,
        request: &ClipRequest,
        plan: &FramePlan,
        pipeline: &mut Pipeline,
        warnings: &mut Vec<ExportWarning>,
    ) -> Result<(Vec<u8>, Option<u64>), DomainError> {
        self.transition(ExportState::EncodingVideo);
        self.encode_video(request, plan, pipeline, warnings).await?;

        self.transition(ExportState::EncodingAudio);
        let audio_label = ExportState::EncodingAudio.task_label();
        self.tracker.update(AUDIO_PROGRESS_START, audio_label);

        let audio_frames = match self.encode_audio(request, plan, &mut pipeline.muxer).await {
            Ok(frames) => Some(frames),
            Err(DomainError::Cancelled) => return Err(DomainError::Cancelled),
            Err(e) => {
                let e = as_audio_failure(e);
                warn!("Continuing without audio: {}", e);
                pipeline.muxer.discard_track(TrackKind::Audio);
                warnings.push(e.into_warning(None));
                None
            }
        };

        self.transition(ExportState::Finalizing);
        self.tracker
            .update(100, ExportState::Finalizing.task_label());

        let bytes = pipeline.muxer.finalize().await.map_err(|e| match e {
            DomainError::MuxFinalizeFailure(_) => e,
            other => DomainError::MuxFinalizeFailure(other.to_string()),
        })?;

        Ok((bytes, audio_frames))
    }

    async fn encode_video(
        &self,
        request: &ClipRequest,
        plan: &FramePlan,
        pipeline: &mut Pipeline,
        warnings: &mut Vec<ExportWarning>,
    ) -> Result<(), DomainError> {
        let label = ExportState::EncodingVideo.task_label();
        self.tracker.update(0, label);

        pipeline
            .sampler
            .preload(request.start_seconds(), self.config.preload_timeout())
            .await;

        for index in 0..plan.total_frames() {
            let target = plan.target_time(request.start_seconds(), index);
            let SampledFrame { unit, warning, .. } =
                pipeline.sampler.sample(plan, index, target).await;

            if let Some(warning) = warning {
                if self.config.strict {
                    return Err(DomainError::FrameCaptureFailure(warning.message));
                }
                warnings.push(warning);
            }

            if let Some(warning) = pipeline.video.encode(&unit, &mut pipeline.muxer)? {
                warnings.push(warning);
            }

            self.tracker.update(plan.video_progress(index + 1), label);
            if self.tracker.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            if (index + 1) % self.config.yield_every_frames == 0 {
                tokio::task::yield_now().await;
            }
        }

        warnings.extend(pipeline.video.finish(&mut pipeline.muxer)?);
        Ok(())
    }

    /// Decode, render and encode the audio window; returns samples per channel encoded
    async fn encode_audio(
        &self,
        request: &ClipRequest,
        plan: &FramePlan,
        muxer: &mut Box<dyn MuxerPort>,
    ) -> Result<u64, DomainError> {
        let mut decoder = self
            .factory
            .create_audio_decoder(request.source(), self.config.audio_sample_rate)?;
        let decoded = decoder.decode_all().await?;

        let stage = AudioRenderStage::new(
            self.config.audio_sample_rate,
            self.config.audio_chunk_frames(),
        );
        let start = request.start_seconds();
        let total_duration = plan.media_duration_seconds();
        let rendered = tokio::task::spawn_blocking(move || {
            stage.render(&decoded, start, total_duration)
        })
        .await
        .map_err(|e| DomainError::AudioStageFailure(format!("Render task failed: {}", e)))??;

        let total = rendered.frame_count() as u64;
        let mut encoder = self
            .factory
            .create_audio_encoder(&self.config.audio_encoder_config())?;

        let label = ExportState::EncodingAudio.task_label();
        let mut blocks = stage.blocks(&rendered);
        let mut chunk_count: u64 = 0;
        let result: Result<(), DomainError> = async {
            while let Some(block) = blocks.next() {
                encoder.encode(&block, muxer)?;
                chunk_count += 1;

                if self.tracker.is_cancelled() {
                    return Err(DomainError::Cancelled);
                }
                if chunk_count % self.config.yield_every_audio_chunks == 0 {
                    self.tracker
                        .update(audio_progress(blocks.offset() as u64, total), label);
                    tokio::task::yield_now().await;
                }
            }
            encoder.flush(muxer)
        }
        .await;
        encoder.close();
        result?;

        debug!(chunks = chunk_count, samples = total, "Audio encoded");
        Ok(total)
    }
}

fn as_audio_failure(error: DomainError) -> DomainError {
    match error {
        DomainError::AudioStageFailure(_) => error,
        other => DomainError::AudioStageFailure(other.to_string()),
    }
}

/// Export `[start_seconds, end_seconds)` of `source` with default settings,
/// reporting integer percentages to `on_progress`.
pub async fn export_clip<F>(
    factory: Arc<dyn PipelineFactory>,
    source: impl AsRef<Path>,
    start_seconds: f64,
    end_seconds: f64,
    on_progress: F,
) -> Result<ExportOutput, DomainError>
where
    F: Fn(u8) + Send + Sync + 'static,
{
    let interactor = ExportInteractor::with_defaults(factory);
    interactor
        .tracker()
        .add_callback(Arc::new(FnProgressCallback::new(on_progress)));
    interactor
        .export_range(source.as_ref(), start_seconds, end_seconds)
        .await
}
