//! Export configuration and its layering.
//!
//! Precedence, lowest first: built-in defaults, a TOML file, then
//! `CLIPFORGE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::{
    AudioEncoderConfig, MediaProperties, MuxerConfig, VideoEncoderConfig, AUDIO_CHANNELS,
    AUDIO_CHUNK_SECONDS, AUDIO_SAMPLE_RATE, FRAME_RATE, KEYFRAME_INTERVAL, PADDING_FRAMES,
};
use crate::error::{ClipperError, ClipperResult};
use crate::utils::logging::{LogFormat, LogLevel, LoggingConfig};

/// Codec string for AVC Constrained Baseline, level 3.1
pub const VIDEO_CODEC: &str = "avc1.42001f";
/// H.264 profiles the encoder may be asked for
pub const VIDEO_PROFILES: [&str; 3] = ["baseline", "main", "high"];
/// Codec string for AAC-LC
pub const AUDIO_CODEC: &str = "mp4a.40.2";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CLIPFORGE_";

/// Tunables for one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub frame_rate: u32,
    pub padding_frames: u64,
    pub keyframe_interval: u64,
    pub video_bitrate: u64,
    pub video_profile: String,
    pub audio_bitrate: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_chunk_seconds: f64,
    pub seek_timeout_ms: u64,
    pub preload_timeout_ms: u64,
    pub yield_every_frames: u64,
    pub yield_every_audio_chunks: u64,
    /// Escalate frame capture and encoder failures to fatal errors
    pub strict: bool,
    /// RGB colour used when no decoded frame is drawable
    pub fallback_color: [u8; 3],
    pub logging: LoggingConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            frame_rate: FRAME_RATE,
            padding_frames: PADDING_FRAMES,
            keyframe_interval: KEYFRAME_INTERVAL,
            video_bitrate: 2_500_000,
            video_profile: "baseline".to_string(),
            audio_bitrate: 128_000,
            audio_sample_rate: AUDIO_SAMPLE_RATE,
            audio_channels: AUDIO_CHANNELS,
            audio_chunk_seconds: AUDIO_CHUNK_SECONDS,
            seek_timeout_ms: 1000,
            preload_timeout_ms: 500,
            yield_every_frames: 5,
            yield_every_audio_chunks: 2,
            strict: false,
            fallback_color: [0, 0, 0],
            logging: LoggingConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> ClipperResult<Self> {
        let config: ExportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then the file at `path` if it exists, then the environment
    pub fn load(path: impl AsRef<Path>) -> ClipperResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
            ExportConfig::default()
        };

        let overrides = config.apply_env_overrides(|key| std::env::var(key).ok())?;
        if overrides > 0 {
            info!("Applied {} environment variable overrides", overrides);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `CLIPFORGE_*` overrides read through `lookup`; returns how many applied
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ClipperResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("FRAME_RATE") {
            self.frame_rate = parse_env("FRAME_RATE", &value)?;
            applied += 1;
        }
        if let Some(value) = var("PADDING_FRAMES") {
            self.padding_frames = parse_env("PADDING_FRAMES", &value)?;
            applied += 1;
        }
        if let Some(value) = var("KEYFRAME_INTERVAL") {
            self.keyframe_interval = parse_env("KEYFRAME_INTERVAL", &value)?;
            applied += 1;
        }
        if let Some(value) = var("VIDEO_BITRATE") {
            self.video_bitrate = parse_env("VIDEO_BITRATE", &value)?;
            applied += 1;
        }
        if let Some(value) = var("AUDIO_BITRATE") {
            self.audio_bitrate = parse_env("AUDIO_BITRATE", &value)?;
            applied += 1;
        }
        if let Some(value) = var("SEEK_TIMEOUT_MS") {
            self.seek_timeout_ms = parse_env("SEEK_TIMEOUT_MS", &value)?;
            applied += 1;
        }
        if let Some(value) = var("STRICT") {
            self.strict = parse_env("STRICT", &value)?;
            applied += 1;
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&value).ok_or_else(|| ClipperError::ConfigError {
                message: format!("{}LOG_LEVEL: unknown level '{}'", ENV_PREFIX, value),
            })?;
            applied += 1;
        }
        if let Some(value) = var("LOG_FORMAT") {
            self.logging.format = match value.trim().to_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                "json" => LogFormat::Json,
                other => {
                    return Err(ClipperError::ConfigError {
                        message: format!("{}LOG_FORMAT: unknown format '{}'", ENV_PREFIX, other),
                    })
                }
            };
            applied += 1;
        }

        Ok(applied)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> ClipperResult<()> {
        let fail = |message: &str| {
            Err(ClipperError::ConfigError {
                message: message.to_string(),
            })
        };

        if self.frame_rate == 0 {
            return fail("frame_rate must be positive");
        }
        if self.keyframe_interval == 0 {
            return fail("keyframe_interval must be positive");
        }
        if !VIDEO_PROFILES.contains(&self.video_profile.as_str()) {
            return fail("video_profile must be one of baseline, main, high");
        }
        if self.audio_sample_rate == 0 {
            return fail("audio_sample_rate must be positive");
        }
        if self.audio_channels != 2 {
            return fail("audio_channels must be 2 (stereo output only)");
        }
        if !(self.audio_chunk_seconds.is_finite() && self.audio_chunk_seconds > 0.0) {
            return fail("audio_chunk_seconds must be positive");
        }
        if self.seek_timeout_ms == 0 || self.preload_timeout_ms == 0 {
            return fail("timeouts must be positive");
        }
        if self.yield_every_frames == 0 || self.yield_every_audio_chunks == 0 {
            return fail("yield intervals must be positive");
        }
        Ok(())
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.preload_timeout_ms)
    }

    /// Samples per channel in one audio block
    pub fn audio_chunk_frames(&self) -> usize {
        ((self.audio_sample_rate as f64 * self.audio_chunk_seconds).floor() as usize).max(1)
    }

    pub fn video_encoder_config(&self, props: &MediaProperties) -> VideoEncoderConfig {
        VideoEncoderConfig {
            codec: video_codec_string(&self.video_profile),
            profile: self.video_profile.clone(),
            width: props.width,
            height: props.height,
            bitrate: self.video_bitrate,
            frame_rate: self.frame_rate,
            keyframe_interval: self.keyframe_interval,
            quality_latency: true,
        }
    }

    pub fn audio_encoder_config(&self) -> AudioEncoderConfig {
        AudioEncoderConfig {
            codec: AUDIO_CODEC.to_string(),
            sample_rate: self.audio_sample_rate,
            channel_count: self.audio_channels,
            bitrate: self.audio_bitrate,
        }
    }

    pub fn muxer_config(&self, props: &MediaProperties) -> MuxerConfig {
        MuxerConfig {
            video_width: props.width,
            video_height: props.height,
            frame_rate: self.frame_rate,
            audio_sample_rate: self.audio_sample_rate,
            audio_channels: self.audio_channels,
            fast_start: true,
        }
    }
}

/// `avc1` codec string for a profile at level 3.1
fn video_codec_string(profile: &str) -> String {
    match profile {
        "main" => "avc1.4d001f".to_string(),
        "high" => "avc1.64001f".to_string(),
        _ => VIDEO_CODEC.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ClipperResult<T> {
    value.trim().parse().map_err(|_| ClipperError::ConfigError {
        message: format!("{}{}: cannot parse '{}'", ENV_PREFIX, name, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = ExportConfig::default();
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.padding_frames, 30);
        assert_eq!(config.keyframe_interval, 30);
        assert_eq!(config.audio_sample_rate, 44_100);
        assert_eq!(config.audio_chunk_frames(), 22_050);
        assert_eq!(config.seek_timeout(), Duration::from_secs(1));
        assert!(!config.strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ExportConfig::from_toml_str(
            "strict = true\nvideo_bitrate = 4000000\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();
        assert!(config.strict);
        assert_eq!(config.video_bitrate, 4_000_000);
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        assert!(ExportConfig::from_toml_str("frame_rate = 0").is_err());
        assert!(ExportConfig::from_toml_str("audio_channels = 6").is_err());
        assert!(ExportConfig::from_toml_str("audio_chunk_seconds = -0.5").is_err());
        assert!(ExportConfig::from_toml_str("frame_rate = \"fast\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<String, String> = [
            ("CLIPFORGE_STRICT", "true"),
            ("CLIPFORGE_SEEK_TIMEOUT_MS", "250"),
            ("CLIPFORGE_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = ExportConfig::default();
        let applied = config.apply_env_overrides(|key| env.get(key).cloned()).unwrap();
        assert_eq!(applied, 3);
        assert!(config.strict);
        assert_eq!(config.seek_timeout_ms, 250);
        assert_eq!(config.logging.level, LogLevel::Trace);
    }

    #[test]
    fn test_bad_env_override_is_an_error() {
        let mut config = ExportConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "CLIPFORGE_FRAME_RATE").then(|| "thirty".to_string())
        });
        assert!(matches!(result, Err(ClipperError::ConfigError { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "padding_frames = 0").unwrap();
        let config = ExportConfig::load(file.path()).unwrap();
        assert_eq!(config.padding_frames, 0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.video_profile, "baseline");
    }
}
