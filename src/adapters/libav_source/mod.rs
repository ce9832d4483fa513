// LibAV frame source adapter - Seekable decoded view over the source video
//
// All ffmpeg objects live on a dedicated decode thread. Seeks are posted to it
// over a channel and completion is published through watch channels, so the
// async side only ever waits on tokio primitives.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::scaling::{Context as ScaleCtx, Flags as ScaleFlags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::Rational;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{even_floor, Plane, SourceMetadata, Surface};
use crate::ports::FrameSourcePort;

/// Targets this far ahead of the decoder are reached by decoding forward instead of seeking
const FORWARD_DECODE_WINDOW_SECONDS: f64 = 2.0;

enum Command {
    Seek { generation: u64, seconds: f64 },
    Shutdown,
}

/// How the decoder reaches the next target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekPlan {
    /// The frame delivered for the previous target is also the first frame at this one
    Reuse,
    DecodeForward,
    Seek,
}

/// Decide how to reach `target` given the last decoded pts and the target that produced it
fn plan_seek(
    position: Option<f64>,
    last_target: Option<f64>,
    target: f64,
    tolerance: f64,
) -> SeekPlan {
    let Some(position) = position else {
        return SeekPlan::Seek;
    };
    match last_target {
        Some(last) if last <= target && target <= position + tolerance => SeekPlan::Reuse,
        _ if target + tolerance < position => SeekPlan::Seek,
        _ if target - position > FORWARD_DECODE_WINDOW_SECONDS => SeekPlan::Seek,
        _ => SeekPlan::DecodeForward,
    }
}

enum Decoded {
    New(DecodedImage),
    Unchanged,
    Missing,
}

/// A scaled YUV420P image with its row strides
struct DecodedImage {
    width: u32,
    height: u32,
    planes: [(Vec<u8>, usize); 3],
}

/// Frame source backed by a libavformat demuxer and libavcodec decoder
pub struct LibavFrameSource {
    path: PathBuf,
    commands: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    requested: u64,
    seek_done: watch::Receiver<u64>,
    frame_ready: watch::Receiver<u64>,
    seek_done_tx: Option<watch::Sender<u64>>,
    frame_ready_tx: Option<watch::Sender<u64>>,
    latest: Arc<Mutex<Option<DecodedImage>>>,
}

impl LibavFrameSource {
    pub fn new(path: &Path) -> Self {
        let (seek_done_tx, seek_done) = watch::channel(0);
        let (frame_ready_tx, frame_ready) = watch::channel(0);
        Self {
            path: path.to_path_buf(),
            commands: None,
            worker: None,
            requested: 0,
            seek_done,
            frame_ready,
            seek_done_tx: Some(seek_done_tx),
            frame_ready_tx: Some(frame_ready_tx),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    async fn wait_for_generation(receiver: &watch::Receiver<u64>, generation: u64) {
        let mut receiver = receiver.clone();
        let closed = receiver.wait_for(|done| *done >= generation).await.is_err();
        if closed {
            // Decode thread is gone; let the caller's timeout decide
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl FrameSourcePort for LibavFrameSource {
    async fn load_metadata(&mut self) -> Result<SourceMetadata, DomainError> {
        if self.commands.is_some() {
            return Err(DomainError::Internal("Source already loaded".to_string()));
        }
        let (seek_done_tx, frame_ready_tx) = match (self.seek_done_tx.take(), self.frame_ready_tx.take()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(DomainError::Internal("Source already released".to_string())),
        };

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let path = self.path.clone();
        let latest = self.latest.clone();

        let worker = std::thread::Builder::new()
            .name("clipforge-decode".to_string())
            .spawn(move || {
                let mut worker = match DecodeWorker::open(&path) {
                    Ok(worker) => worker,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(worker.metadata())).is_err() {
                    return;
                }
                worker.run(command_rx, latest, seek_done_tx, frame_ready_tx);
            })
            .map_err(|e| DomainError::Internal(format!("Failed to spawn decode thread: {}", e)))?;

        self.commands = Some(command_tx);
        self.worker = Some(worker);

        let metadata = ready_rx
            .await
            .map_err(|_| DomainError::InvalidSource("Decode thread exited during probe".to_string()))??;

        info!(
            path = %self.path.display(),
            width = metadata.width,
            height = metadata.height,
            duration = metadata.duration_seconds,
            "Source opened"
        );
        Ok(metadata)
    }

    fn request_seek(&mut self, seconds: f64) {
        self.requested += 1;
        if let Some(commands) = &self.commands {
            let command = Command::Seek {
                generation: self.requested,
                seconds,
            };
            if commands.send(command).is_err() {
                warn!("Decode thread is not accepting seeks");
            }
        }
    }

    async fn seek_completed(&self) {
        Self::wait_for_generation(&self.seek_done, self.requested).await
    }

    async fn frame_available(&self) {
        Self::wait_for_generation(&self.frame_ready, self.requested).await
    }

    fn has_decodable_frame(&self) -> bool {
        self.latest
            .lock()
            .map(|latest| latest.is_some())
            .unwrap_or(false)
    }

    fn draw_into(&mut self, surface: &mut Surface) -> Result<(), DomainError> {
        let latest = self
            .latest
            .lock()
            .map_err(|_| DomainError::FrameCaptureFailure("Frame buffer lock poisoned".to_string()))?;
        let image = latest
            .as_ref()
            .ok_or_else(|| DomainError::FrameCaptureFailure("No decoded frame".to_string()))?;

        if image.width != surface.width() || image.height != surface.height() {
            return Err(DomainError::FrameCaptureFailure(format!(
                "Decoded frame is {}x{}, surface is {}x{}",
                image.width,
                image.height,
                surface.width(),
                surface.height()
            )));
        }

        for (plane, (data, stride)) in [Plane::Y, Plane::U, Plane::V].into_iter().zip(&image.planes) {
            surface.copy_plane_from(plane, data, *stride)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Shutdown);
        }
        // Waits at most for the frame currently being decoded
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(path = %self.path.display(), "Decode thread panicked");
            } else {
                debug!(path = %self.path.display(), "Decode thread joined");
            }
        }
        if let Ok(mut latest) = self.latest.lock() {
            latest.take();
        }
    }
}

impl Drop for LibavFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the demuxer, decoder and scaler; runs on the decode thread only
struct DecodeWorker {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: Rational,
    start_offset: f64,
    duration_seconds: f64,
    out_width: u32,
    out_height: u32,
    scaler: Option<ScaleCtx>,
    scaler_input: Option<(Pixel, u32, u32)>,
    position: Option<f64>,
    last_target: Option<f64>,
    eof: bool,
}

impl DecodeWorker {
    fn open(path: &Path) -> Result<Self, DomainError> {
        let input = ffmpeg::format::input(&path)
            .map_err(|e| DomainError::InvalidSource(format!("Failed to open input: {}", e)))?;

        let stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| DomainError::InvalidSource("No video stream found".to_string()))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_offset = match stream.start_time() {
            ffmpeg::ffi::AV_NOPTS_VALUE => 0.0,
            ts => ts as f64 * f64::from(time_base),
        };
        let stream_duration = match stream.duration() {
            ffmpeg::ffi::AV_NOPTS_VALUE => 0.0,
            d => d as f64 * f64::from(time_base),
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| DomainError::InvalidSource(format!("Failed to open video decoder: {}", e)))?;

        let container_duration = input.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        let duration_seconds = if container_duration > 0.0 {
            container_duration
        } else {
            stream_duration
        };

        Ok(Self {
            out_width: even_floor(decoder.width()),
            out_height: even_floor(decoder.height()),
            input,
            decoder,
            stream_index,
            time_base,
            start_offset,
            duration_seconds,
            scaler: None,
            scaler_input: None,
            position: None,
            last_target: None,
            eof: false,
        })
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            width: self.decoder.width(),
            height: self.decoder.height(),
            duration_seconds: self.duration_seconds,
        }
    }

    fn run(
        &mut self,
        commands: mpsc::Receiver<Command>,
        latest: Arc<Mutex<Option<DecodedImage>>>,
        seek_done: watch::Sender<u64>,
        frame_ready: watch::Sender<u64>,
    ) {
        while let Ok(mut command) = commands.recv() {
            // Only the newest seek matters
            while let Ok(next) = commands.try_recv() {
                command = next;
            }

            let (generation, seconds) = match command {
                Command::Shutdown => break,
                Command::Seek {
                    generation,
                    seconds,
                } => (generation, seconds),
            };

            match self.frame_at(seconds) {
                Ok(Decoded::New(image)) => {
                    if let Ok(mut slot) = latest.lock() {
                        *slot = Some(image);
                    }
                    frame_ready.send_replace(generation);
                }
                Ok(Decoded::Unchanged) => {
                    frame_ready.send_replace(generation);
                }
                Ok(Decoded::Missing) => debug!(target_seconds = seconds, "No new frame at seek target"),
                Err(e) => warn!(target_seconds = seconds, "Decode failed: {}", e),
            }
            seek_done.send_replace(generation);
        }
        debug!("Decode thread stopped");
    }

    /// Decode the first frame at or after `seconds`, seeking only when needed
    fn frame_at(&mut self, seconds: f64) -> Result<Decoded, ffmpeg::Error> {
        let tolerance = 0.5 * f64::from(self.time_base).max(1.0 / 120.0);
        match plan_seek(self.position, self.last_target, seconds, tolerance) {
            SeekPlan::Reuse => return Ok(Decoded::Unchanged),
            SeekPlan::Seek => self.seek(seconds)?,
            SeekPlan::DecodeForward if self.eof => return Ok(Decoded::Missing),
            SeekPlan::DecodeForward => {}
        }
        self.last_target = None;

        let mut decoded = VideoFrame::empty();
        let mut candidate = VideoFrame::empty();
        let mut have_candidate = false;

        loop {
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded
                    .timestamp()
                    .map(|ts| ts as f64 * f64::from(self.time_base) - self.start_offset)
                    .unwrap_or_else(|| self.position.unwrap_or(0.0));
                self.position = Some(pts);
                std::mem::swap(&mut decoded, &mut candidate);
                have_candidate = true;

                if pts + tolerance >= seconds {
                    return self.deliver(&candidate, seconds);
                }
            }

            if self.eof {
                return if have_candidate {
                    self.deliver(&candidate, seconds)
                } else {
                    Ok(Decoded::Missing)
                };
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);

            match packet {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        debug!("Skipping undecodable packet: {}", e);
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.eof = true;
                }
            }
        }
    }

    fn deliver(&mut self, frame: &VideoFrame, seconds: f64) -> Result<Decoded, ffmpeg::Error> {
        let image = self.convert(frame)?;
        self.last_target = Some(seconds);
        Ok(Decoded::New(image))
    }

    fn seek(&mut self, seconds: f64) -> Result<(), ffmpeg::Error> {
        let absolute = (seconds + self.start_offset).max(0.0);
        let ts = (absolute * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        // Land on the last keyframe at or before the target
        self.input.seek(ts, i64::MIN..ts + 1)?;
        self.decoder.flush();
        self.position = None;
        self.last_target = None;
        self.eof = false;
        Ok(())
    }

    fn convert(&mut self, frame: &VideoFrame) -> Result<DecodedImage, ffmpeg::Error> {
        let input = (frame.format(), frame.width(), frame.height());
        if self.scaler_input != Some(input) {
            self.scaler = Some(ScaleCtx::get(
                input.0,
                input.1,
                input.2,
                Pixel::YUV420P,
                self.out_width,
                self.out_height,
                ScaleFlags::BILINEAR,
            )?);
            self.scaler_input = Some(input);
        }

        let mut yuv = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut yuv)?;
        }

        Ok(DecodedImage {
            width: self.out_width,
            height: self.out_height,
            planes: [
                (yuv.data(0).to_vec(), yuv.stride(0)),
                (yuv.data(1).to_vec(), yuv.stride(1)),
                (yuv.data(2).to_vec(), yuv.stride(2)),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 0.5 / 120.0;

    #[test]
    fn test_first_target_seeks() {
        assert_eq!(plan_seek(None, None, 5.0, TOLERANCE), SeekPlan::Seek);
    }

    #[test]
    fn test_backward_and_far_targets_seek() {
        assert_eq!(plan_seek(Some(5.0), Some(5.0), 4.0, TOLERANCE), SeekPlan::Seek);
        assert_eq!(plan_seek(Some(5.0), Some(5.0), 7.5, TOLERANCE), SeekPlan::Seek);
    }

    #[test]
    fn test_near_forward_target_decodes_forward() {
        assert_eq!(plan_seek(Some(5.0), Some(5.0), 5.5, TOLERANCE), SeekPlan::DecodeForward);
    }

    #[test]
    fn test_target_inside_delivered_frame_is_reused() {
        // 24 fps frame at 0.0417 delivered for target 0.0333; 0.04 still maps to it
        assert_eq!(
            plan_seek(Some(1.0 / 24.0), Some(1.0 / 30.0), 0.04, TOLERANCE),
            SeekPlan::Reuse
        );
        // Without the earlier target the same position means a backward request
        assert_eq!(plan_seek(Some(1.0 / 24.0), None, 0.03, TOLERANCE), SeekPlan::Seek);
    }

    #[test]
    fn test_30fps_sampling_of_23_976_source_seeks_once() {
        let frame_duration = 1001.0 / 24_000.0;
        let first_frame_at = |t: f64| ((t - TOLERANCE) / frame_duration).ceil().max(0.0);

        let mut position: Option<f64> = None;
        let mut last_target = None;
        let mut delivered = 0.0;
        let mut seeks = 0;
        for k in 0..300 {
            let target = k as f64 / 30.0;
            match plan_seek(position, last_target, target, TOLERANCE) {
                SeekPlan::Reuse => {}
                plan => {
                    if plan == SeekPlan::Seek {
                        seeks += 1;
                    }
                    delivered = first_frame_at(target);
                    position = Some(delivered * frame_duration);
                }
            }
            last_target = Some(target);
            assert_eq!(delivered, first_frame_at(target), "wrong frame for target {}", target);
        }
        assert_eq!(seeks, 1);
    }

    #[tokio::test]
    async fn test_release_joins_decode_thread() {
        ffmpeg::init().unwrap();
        let mut source = LibavFrameSource::new(Path::new("/nonexistent/clip.mp4"));

        let err = source.load_metadata().await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidSource(_)));

        source.release();
        assert!(source.worker.is_none());
        assert!(source.commands.is_none());
        assert!(!source.has_decodable_frame());

        // Second release is a no-op
        source.release();
    }
}
