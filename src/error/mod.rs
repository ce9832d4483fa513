//! Error handling module for Clipforge

use thiserror::Error;

/// Main error type for setup and configuration concerns around an export
#[derive(Error, Debug)]
pub enum ClipperError {
    /// Invalid time format
    #[error("Invalid time format: {time}. Expected HH:MM:SS, MM:SS, or seconds")]
    InvalidTimeFormat { time: String },

    /// FFmpeg initialization error
    #[error("Failed to initialize FFmpeg: {message}")]
    FFmpegInitError { message: String },

    /// Configuration could not be parsed or failed validation
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parse error
    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for Clipforge operations
pub type ClipperResult<T> = std::result::Result<T, ClipperError>;
