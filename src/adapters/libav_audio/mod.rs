// LibAV audio adapters - Source audio decoding and AAC-LC encoding

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::resampling;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::{ChannelLayout, Dictionary, Packet, Rational};
use tracing::{debug, info};

use crate::domain::errors::DomainError;
use crate::domain::model::{
    AudioEncoderConfig, AudioSampleBlock, CodecMetadata, DecodedAudio, EncodedChunk, TrackKind,
    MICROS_PER_SECOND,
};
use crate::ports::{AudioDecodePort, AudioEncoderPort, ChunkSink};

use super::libav_video::read_extradata;

/// Decodes the primary audio track, resampled to stereo planar float
pub struct LibavAudioDecoder {
    path: PathBuf,
    sample_rate: u32,
}

impl LibavAudioDecoder {
    pub fn new(path: &Path, sample_rate: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            sample_rate,
        }
    }
}

#[async_trait]
impl AudioDecodePort for LibavAudioDecoder {
    async fn decode_all(&mut self) -> Result<DecodedAudio, DomainError> {
        let path = self.path.clone();
        let sample_rate = self.sample_rate;
        tokio::task::spawn_blocking(move || decode_file(&path, sample_rate))
            .await
            .map_err(|e| DomainError::AudioStageFailure(format!("Decode task failed: {}", e)))?
    }
}

/// Accumulates resampler output; the swr context is built from the first frame
struct StereoCollector {
    resampler: Option<resampling::Context>,
    sample_rate: u32,
    audio: DecodedAudio,
}

impl StereoCollector {
    fn new(sample_rate: u32) -> Self {
        Self {
            resampler: None,
            sample_rate,
            audio: DecodedAudio {
                sample_rate,
                channels: vec![Vec::new(), Vec::new()],
            },
        }
    }

    fn push(&mut self, frame: &AudioFrame) -> Result<(), DomainError> {
        if frame.samples() == 0 {
            return Ok(());
        }
        if self.resampler.is_none() {
            self.resampler = Some(create_resampler(frame, self.sample_rate)?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        let mut resampled = AudioFrame::empty();
        resampler
            .run(frame, &mut resampled)
            .map_err(|e| audio_error("resample audio", e))?;
        append_stereo(&mut self.audio, &resampled);
        Ok(())
    }

    fn finish(mut self) -> DecodedAudio {
        if let Some(resampler) = self.resampler.as_mut() {
            loop {
                let mut tail = AudioFrame::empty();
                if resampler.flush(&mut tail).is_err() || tail.samples() == 0 {
                    break;
                }
                append_stereo(&mut self.audio, &tail);
            }
        }
        self.audio
    }
}

fn create_resampler(
    frame: &AudioFrame,
    sample_rate: u32,
) -> Result<resampling::Context, DomainError> {
    // Mono must be declared explicitly or swr misreads the layout
    let layout = match frame.channels() {
        0 | 1 => ChannelLayout::MONO,
        2 if frame.channel_layout().is_empty() => ChannelLayout::STEREO,
        _ => frame.channel_layout(),
    };

    debug!(
        format = ?frame.format(),
        channels = frame.channels(),
        rate = frame.rate(),
        target_rate = sample_rate,
        "Creating audio resampler"
    );

    resampling::Context::get(
        frame.format(),
        layout,
        frame.rate(),
        Sample::F32(SampleType::Planar),
        ChannelLayout::STEREO,
        sample_rate,
    )
    .map_err(|e| audio_error("create audio resampler", e))
}

fn append_stereo(audio: &mut DecodedAudio, frame: &AudioFrame) {
    if frame.samples() == 0 {
        return;
    }
    for (plane, out) in audio.channels.iter_mut().enumerate().take(2) {
        out.extend_from_slice(frame.plane::<f32>(plane));
    }
}

fn decode_file(path: &Path, sample_rate: u32) -> Result<DecodedAudio, DomainError> {
    let mut input = ffmpeg::format::input(&path).map_err(|e| audio_error("open input", e))?;
    let stream = input
        .streams()
        .best(MediaType::Audio)
        .ok_or_else(|| DomainError::AudioStageFailure("Source has no audio track".to_string()))?;
    let stream_index = stream.index();

    let mut decoder = codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().audio())
        .map_err(|e| audio_error("open audio decoder", e))?;

    let source_rate = decoder.rate();
    let mut collector = StereoCollector::new(sample_rate);
    let mut frame = AudioFrame::empty();

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if let Err(e) = decoder.send_packet(&packet) {
            debug!("Skipping undecodable audio packet: {}", e);
            continue;
        }
        while decoder.receive_frame(&mut frame).is_ok() {
            collector.push(&frame)?;
        }
    }

    decoder
        .send_eof()
        .map_err(|e| audio_error("flush audio decoder", e))?;
    while decoder.receive_frame(&mut frame).is_ok() {
        collector.push(&frame)?;
    }

    let audio = collector.finish();
    if audio.frame_count() == 0 {
        return Err(DomainError::AudioStageFailure(
            "Audio track decoded to no samples".to_string(),
        ));
    }

    info!(
        source_rate,
        sample_rate = audio.sample_rate,
        samples = audio.frame_count(),
        "Source audio decoded"
    );
    Ok(audio)
}

fn audio_error(action: &str, error: ffmpeg::Error) -> DomainError {
    DomainError::AudioStageFailure(format!("Failed to {}: {}", action, error))
}

/// AAC-LC encoder fed through a FIFO of encoder-sized frames
pub struct LibavAudioEncoder {
    encoder: ffmpeg::encoder::Audio,
    codec: String,
    sample_rate: u32,
    frame_size: usize,
    left: Vec<f32>,
    right: Vec<f32>,
    next_pts: i64,
    description: Option<Vec<u8>>,
}

impl LibavAudioEncoder {
    pub fn new(config: &AudioEncoderConfig) -> Result<Self, DomainError> {
        if config.channel_count != 2 {
            return Err(DomainError::AudioStageFailure(format!(
                "Only stereo output is supported, got {} channels",
                config.channel_count
            )));
        }

        let aac = ffmpeg::encoder::find(codec::Id::AAC)
            .ok_or_else(|| DomainError::AudioStageFailure("No AAC encoder available".to_string()))?;

        let mut audio = codec::context::Context::new_with_codec(aac)
            .encoder()
            .audio()
            .map_err(|e| audio_error("create audio encoder context", e))?;

        audio.set_rate(config.sample_rate as i32);
        audio.set_format(Sample::F32(SampleType::Planar));
        audio.set_bit_rate(config.bitrate as usize);
        audio.set_time_base(Rational::new(1, config.sample_rate as i32));
        audio.set_flags(codec::Flags::GLOBAL_HEADER);
        unsafe {
            ffmpeg::ffi::av_channel_layout_default(
                &mut (*audio.as_mut_ptr()).ch_layout,
                config.channel_count as i32,
            );
        }

        let mut opts = Dictionary::new();
        opts.set("profile", "aac_low");

        let encoder = audio
            .open_as_with(aac, opts)
            .map_err(|e| audio_error("open AAC encoder", e))?;
        let frame_size = (encoder.frame_size() as usize).max(1024);
        let description = unsafe { read_extradata(encoder.as_ptr()) };

        info!(
            codec = %config.codec,
            sample_rate = config.sample_rate,
            bitrate = config.bitrate,
            frame_size,
            "Audio encoder opened"
        );

        Ok(Self {
            encoder,
            codec: config.codec.clone(),
            sample_rate: config.sample_rate,
            frame_size,
            left: Vec::new(),
            right: Vec::new(),
            next_pts: 0,
            description: Some(description),
        })
    }

    /// Pop one encoder frame, zero-padding a short tail
    fn pop_frame(&mut self) -> AudioFrame {
        let n = self.frame_size;
        let available = self.left.len().min(n);

        let mut frame = AudioFrame::new(Sample::F32(SampleType::Planar), n, ChannelLayout::STEREO);
        frame.set_rate(self.sample_rate);
        frame.set_pts(Some(self.next_pts));
        self.next_pts += n as i64;

        for (plane, source) in [&self.left, &self.right].into_iter().enumerate() {
            let dst = frame.plane_mut::<f32>(plane);
            dst[..available].copy_from_slice(&source[..available]);
            dst[available..].fill(0.0);
        }

        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }

    fn drain_fifo(&mut self, sink: &mut dyn ChunkSink, flush: bool) -> Result<(), DomainError> {
        while self.left.len() >= self.frame_size || (flush && !self.left.is_empty()) {
            let frame = self.pop_frame();
            self.encoder
                .send_frame(&frame)
                .map_err(|e| audio_error("send audio frame", e))?;
            self.drain_packets(sink)?;
        }
        Ok(())
    }

    fn drain_packets(&mut self, sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let payload = match packet.data() {
                Some(data) if !data.is_empty() => data.to_vec(),
                _ => continue,
            };
            let duration = match packet.duration() {
                d if d > 0 => d,
                _ => self.frame_size as i64,
            };
            let metadata = self.description.take().map(|description| CodecMetadata {
                codec: self.codec.clone(),
                description,
            });

            sink.accept(EncodedChunk {
                track: TrackKind::Audio,
                timestamp_micros: self.to_micros(packet.pts().unwrap_or(0)),
                duration_micros: self.to_micros(duration),
                is_key: true,
                payload,
                metadata,
            })?;
        }
        Ok(())
    }

    fn to_micros(&self, samples: i64) -> i64 {
        (samples as f64 * MICROS_PER_SECOND / self.sample_rate as f64).round() as i64
    }
}

impl AudioEncoderPort for LibavAudioEncoder {
    fn encode(&mut self, block: &AudioSampleBlock, sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
        if block.channel_count != 2 || block.sample_rate != self.sample_rate {
            return Err(DomainError::AudioStageFailure(format!(
                "Block is {} ch @ {} Hz, encoder expects 2 ch @ {} Hz",
                block.channel_count, block.sample_rate, self.sample_rate
            )));
        }
        for pair in block.samples.chunks_exact(2) {
            self.left.push(pair[0]);
            self.right.push(pair[1]);
        }
        self.drain_fifo(sink, false)
    }

    fn flush(&mut self, sink: &mut dyn ChunkSink) -> Result<(), DomainError> {
        self.drain_fifo(sink, true)?;
        self.encoder
            .send_eof()
            .map_err(|e| audio_error("flush audio encoder", e))?;
        self.drain_packets(sink)
    }

    fn close(&mut self) {
        self.left.clear();
        self.right.clear();
        debug!("Audio encoder closed");
    }
}
