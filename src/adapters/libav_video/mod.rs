// LibAV video encoder adapter - H.264 via libavcodec

use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{picture, Dictionary, Packet, Rational};
use tracing::{debug, info};

use crate::domain::errors::DomainError;
use crate::domain::model::{
    CodecMetadata, EncodedChunk, FrameUnit, Plane, TrackKind, VideoEncoderConfig,
    MICROS_PER_SECOND,
};
use crate::ports::{ChunkSink, VideoEncoderPort};

/// H.264 encoder producing one chunk per access unit
pub struct LibavVideoEncoder {
    encoder: ffmpeg::encoder::Video,
    frame: VideoFrame,
    codec: String,
    frame_rate: u32,
    description: Option<Vec<u8>>,
}

impl LibavVideoEncoder {
    pub fn new(config: &VideoEncoderConfig) -> Result<Self, DomainError> {
        let h264 = ffmpeg::encoder::find_by_name("libx264")
            .or_else(|| ffmpeg::encoder::find(codec::Id::H264))
            .ok_or_else(|| DomainError::EncoderFailure("No H.264 encoder available".to_string()))?;

        let mut video = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()
            .map_err(|e| encoder_error("create video encoder context", e))?;

        let time_base = Rational::new(1, config.frame_rate as i32);
        video.set_width(config.width);
        video.set_height(config.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(time_base);
        video.set_frame_rate(Some(Rational::new(config.frame_rate as i32, 1)));
        video.set_bit_rate(config.bitrate as usize);
        video.set_gop(config.keyframe_interval as u32);
        video.set_max_b_frames(0);
        video.set_flags(codec::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        opts.set("profile", &config.profile);
        opts.set("level", "3.1");
        opts.set("preset", if config.quality_latency { "medium" } else { "veryfast" });
        opts.set("forced-idr", "1");
        opts.set("threads", &num_cpus::get().to_string());

        let encoder = video
            .open_as_with(h264, opts)
            .map_err(|e| encoder_error("open H.264 encoder", e))?;

        // Global header mode leaves SPS/PPS in extradata instead of the bitstream
        let description = unsafe { read_extradata(encoder.as_ptr()) };

        info!(
            codec = %config.codec,
            profile = %config.profile,
            encoder = h264.name(),
            width = config.width,
            height = config.height,
            bitrate = config.bitrate,
            gop = config.keyframe_interval,
            "Video encoder opened"
        );

        Ok(Self {
            encoder,
            frame: VideoFrame::new(Pixel::YUV420P, config.width, config.height),
            codec: config.codec.clone(),
            frame_rate: config.frame_rate,
            description: Some(description),
        })
    }

    fn load_frame(&mut self, unit: &FrameUnit<'_>) -> Result<(), DomainError> {
        let surface = unit.image;
        if surface.width() != self.frame.width() || surface.height() != self.frame.height() {
            return Err(DomainError::EncoderFailure(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                surface.width(),
                surface.height(),
                self.frame.width(),
                self.frame.height()
            )));
        }

        for (index, plane) in [Plane::Y, Plane::U, Plane::V].into_iter().enumerate() {
            let width = surface.plane_width(plane);
            let src = surface.plane(plane);
            let stride = self.frame.stride(index);
            let dst = self.frame.data_mut(index);
            for (row, line) in src.chunks_exact(width).enumerate() {
                dst[row * stride..row * stride + width].copy_from_slice(line);
            }
        }

        self.frame.set_pts(Some(unit.index as i64));
        self.frame.set_kind(if unit.is_keyframe {
            picture::Type::I
        } else {
            picture::Type::None
        });
        Ok(())
    }

    fn drain(&mut self, sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let payload = match packet.data() {
                Some(data) if !data.is_empty() => data.to_vec(),
                _ => continue,
            };
            let pts = packet.pts().unwrap_or(0);
            let metadata = self.description.take().map(|description| CodecMetadata {
                codec: self.codec.clone(),
                description,
            });

            sink.accept(EncodedChunk {
                track: TrackKind::Video,
                timestamp_micros: self.to_micros(pts),
                duration_micros: self.to_micros(1),
                is_key: packet.is_key(),
                payload,
                metadata,
            })?;
        }
        Ok(())
    }

    fn to_micros(&self, frames: i64) -> i64 {
        (frames as f64 * MICROS_PER_SECOND / self.frame_rate as f64).round() as i64
    }
}

impl VideoEncoderPort for LibavVideoEncoder {
    fn encode(&mut self, frame: &FrameUnit<'_>, sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
        self.load_frame(frame)?;
        self.encoder
            .send_frame(&self.frame)
            .map_err(|e| encoder_error("send frame", e))?;
        self.drain(sink)
    }

    fn flush(&mut self, sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
        self.encoder
            .send_eof()
            .map_err(|e| encoder_error("flush video encoder", e))?;
        self.drain(sink)
    }

    fn close(&mut self) {
        debug!("Video encoder closed");
    }
}

fn encoder_error(action: &str, error: ffmpeg::Error) -> DomainError {
    DomainError::EncoderFailure(format!("Failed to {}: {}", action, error))
}

/// Copy the opened codec context's extradata
///
/// # Safety
/// `ctx` must point to a live, opened codec context.
pub(crate) unsafe fn read_extradata(ctx: *const ffmpeg::ffi::AVCodecContext) -> Vec<u8> {
    let data = (*ctx).extradata;
    let size = (*ctx).extradata_size;
    if data.is_null() || size <= 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(data, size as usize).to_vec()
}
