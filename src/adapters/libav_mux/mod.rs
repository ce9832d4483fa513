// LibAV muxer adapter - In-memory fast-start MP4 assembly
//
// Chunks are buffered per track while encoding runs; finalize writes them in
// one pass through libavformat into a temporary file and reads the bytes back.

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::ffi;
use ffmpeg::{codec, packet, Dictionary, Packet, Rational};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{EncodedChunk, MuxerConfig, TrackKind};
use crate::ports::MuxerPort;

const MICROS: Rational = Rational(1, 1_000_000);

#[derive(Default)]
struct TrackBuffer {
    chunks: Vec<EncodedChunk>,
    description: Vec<u8>,
    discarded: bool,
}

impl TrackBuffer {
    fn push(&mut self, mut chunk: EncodedChunk) {
        if let Some(metadata) = chunk.metadata.take() {
            if self.description.is_empty() {
                self.description = metadata.description;
            }
        }
        self.chunks.push(chunk);
    }

    /// First timestamp, rebased to zero on output
    fn origin(&self) -> i64 {
        self.chunks
            .iter()
            .map(|chunk| chunk.timestamp_micros)
            .min()
            .unwrap_or(0)
    }

    fn is_muxable(&self) -> bool {
        !self.discarded && !self.chunks.is_empty()
    }
}

/// Buffers encoded chunks and serializes them as MP4 with the index up front
pub struct LibavMuxer {
    config: MuxerConfig,
    video: TrackBuffer,
    audio: TrackBuffer,
    aborted: bool,
}

impl LibavMuxer {
    pub fn new(config: &MuxerConfig) -> Self {
        Self {
            config: config.clone(),
            video: TrackBuffer::default(),
            audio: TrackBuffer::default(),
            aborted: false,
        }
    }

    fn track_mut(&mut self, track: TrackKind) -> &mut TrackBuffer {
        match track {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        }
    }
}

#[async_trait]
impl MuxerPort for LibavMuxer {
    fn accept(&mut self, chunk: EncodedChunk) -> Result<(), DomainError> {
        if self.aborted {
            return Err(DomainError::MuxFinalizeFailure("Muxer was aborted".to_string()));
        }
        let buffer = self.track_mut(chunk.track);
        if !buffer.discarded {
            buffer.push(chunk);
        }
        Ok(())
    }

    fn discard_track(&mut self, track: TrackKind) {
        let buffer = self.track_mut(track);
        buffer.discarded = true;
        buffer.chunks.clear();
        debug!(?track, "Track discarded");
    }

    async fn finalize(&mut self) -> Result<Vec<u8>, DomainError> {
        if self.aborted {
            return Err(DomainError::MuxFinalizeFailure("Muxer was aborted".to_string()));
        }
        if !self.video.is_muxable() {
            return Err(DomainError::MuxFinalizeFailure("No video chunks to mux".to_string()));
        }

        let config = self.config.clone();
        let video = std::mem::take(&mut self.video);
        let audio = std::mem::take(&mut self.audio);
        let audio = if audio.is_muxable() { Some(audio) } else { None };

        tokio::task::spawn_blocking(move || write_mp4(&config, video, audio))
            .await
            .map_err(|e| DomainError::MuxFinalizeFailure(format!("Mux task failed: {}", e)))?
    }

    fn abort(&mut self) {
        if !self.aborted {
            self.aborted = true;
            self.video = TrackBuffer::default();
            self.audio = TrackBuffer::default();
            debug!("Muxer aborted");
        }
    }
}

fn mux_error(action: &str, error: impl std::fmt::Display) -> DomainError {
    DomainError::MuxFinalizeFailure(format!("Failed to {}: {}", action, error))
}

fn write_mp4(
    config: &MuxerConfig,
    video: TrackBuffer,
    audio: Option<TrackBuffer>,
) -> Result<Vec<u8>, DomainError> {
    let file = tempfile::Builder::new()
        .prefix("clipforge-")
        .suffix(".mp4")
        .tempfile()
        .map_err(|e| mux_error("create temporary output", e))?;

    let mut octx = ffmpeg::format::output_as(&file.path(), "mp4")
        .map_err(|e| mux_error("create MP4 output", e))?;

    let video_index = add_video_stream(&mut octx, config, &video.description)?;
    let audio_index = match &audio {
        Some(track) => Some(add_audio_stream(&mut octx, config, &track.description)?),
        None => None,
    };

    let mut opts = Dictionary::new();
    if config.fast_start {
        opts.set("movflags", "+faststart");
    }
    octx.write_header_with(opts)
        .map_err(|e| mux_error("write MP4 header", e))?;

    let mut queue: Vec<(usize, i64, EncodedChunk)> = Vec::new();
    let video_origin = video.origin();
    queue.extend(
        video
            .chunks
            .into_iter()
            .map(|chunk| (video_index, video_origin, chunk)),
    );
    if let (Some(track), Some(index)) = (audio, audio_index) {
        let origin = track.origin();
        queue.extend(track.chunks.into_iter().map(|chunk| (index, origin, chunk)));
    }
    queue.sort_by_key(|(_, origin, chunk)| chunk.timestamp_micros - origin);

    let mut written = 0usize;
    for (index, origin, chunk) in queue {
        let stream_tb = octx
            .stream(index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| mux_error("look up stream", index))?;

        let ts = chunk.timestamp_micros - origin;
        let mut pkt = Packet::copy(&chunk.payload);
        pkt.set_stream(index);
        pkt.set_pts(Some(ts));
        pkt.set_dts(Some(ts));
        pkt.set_duration(chunk.duration_micros);
        if chunk.is_key {
            pkt.set_flags(packet::Flags::KEY);
        }
        pkt.rescale_ts(MICROS, stream_tb);
        pkt.write_interleaved(&mut octx)
            .map_err(|e| mux_error("write packet", e))?;
        written += 1;
    }

    octx.write_trailer()
        .map_err(|e| mux_error("write MP4 trailer", e))?;
    drop(octx);

    let bytes = std::fs::read(file.path()).map_err(|e| mux_error("read muxed output", e))?;
    if bytes.is_empty() {
        warn!("Muxer produced an empty file");
        return Err(DomainError::MuxFinalizeFailure("Empty container".to_string()));
    }

    info!(
        packets = written,
        bytes = bytes.len(),
        audio = audio_index.is_some(),
        fast_start = config.fast_start,
        "MP4 finalized"
    );
    Ok(bytes)
}

fn add_video_stream(
    octx: &mut ffmpeg::format::context::Output,
    config: &MuxerConfig,
    description: &[u8],
) -> Result<usize, DomainError> {
    let h264 = ffmpeg::encoder::find(codec::Id::H264)
        .ok_or_else(|| mux_error("find H.264 codec", "not registered"))?;
    let mut stream = octx
        .add_stream(h264)
        .map_err(|e| mux_error("add video stream", e))?;
    stream.set_time_base(Rational(1, config.frame_rate as i32 * 1000));
    stream.set_avg_frame_rate(Rational(config.frame_rate as i32, 1));

    unsafe {
        let par = (*stream.as_mut_ptr()).codecpar;
        (*par).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
        (*par).codec_id = ffi::AVCodecID::AV_CODEC_ID_H264;
        (*par).width = config.video_width as i32;
        (*par).height = config.video_height as i32;
        (*par).format = ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
        set_extradata(par, description)?;
    }
    Ok(stream.index())
}

fn add_audio_stream(
    octx: &mut ffmpeg::format::context::Output,
    config: &MuxerConfig,
    description: &[u8],
) -> Result<usize, DomainError> {
    let aac = ffmpeg::encoder::find(codec::Id::AAC)
        .ok_or_else(|| mux_error("find AAC codec", "not registered"))?;
    let mut stream = octx
        .add_stream(aac)
        .map_err(|e| mux_error("add audio stream", e))?;
    stream.set_time_base(Rational(1, config.audio_sample_rate as i32));

    unsafe {
        let par = (*stream.as_mut_ptr()).codecpar;
        (*par).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*par).codec_id = ffi::AVCodecID::AV_CODEC_ID_AAC;
        (*par).sample_rate = config.audio_sample_rate as i32;
        (*par).format = ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP as i32;
        (*par).frame_size = 1024;
        ffi::av_channel_layout_default(&mut (*par).ch_layout, config.audio_channels as i32);
        set_extradata(par, description)?;
    }
    Ok(stream.index())
}

/// Install decoder configuration on stream parameters
///
/// # Safety
/// `par` must point to codec parameters owned by a live stream.
unsafe fn set_extradata(
    par: *mut ffi::AVCodecParameters,
    description: &[u8],
) -> Result<(), DomainError> {
    if description.is_empty() {
        return Ok(());
    }
    let padded = description.len() + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    let buffer = ffi::av_mallocz(padded) as *mut u8;
    if buffer.is_null() {
        return Err(DomainError::MuxFinalizeFailure(
            "Out of memory for codec configuration".to_string(),
        ));
    }
    std::ptr::copy_nonoverlapping(description.as_ptr(), buffer, description.len());
    ffi::av_freep(&mut (*par).extradata as *mut *mut u8 as *mut std::ffi::c_void);
    (*par).extradata = buffer;
    (*par).extradata_size = description.len() as i32;
    Ok(())
}
