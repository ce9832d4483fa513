// Domain errors - Error taxonomy for the export pipeline

use std::fmt;

use serde::{Deserialize, Serialize};

/// Message shown to users for any fatal export failure
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Export failed. Your environment may lack the required media capabilities.";

/// Kind of failure, independent of the message it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    InvalidSource,
    FrameCaptureFailure,
    EncoderFailure,
    AudioStageFailure,
    MuxFinalizeFailure,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether this kind aborts an export under the default (best-effort) policy
    pub fn is_fatal_by_default(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest
                | ErrorKind::InvalidSource
                | ErrorKind::MuxFinalizeFailure
                | ErrorKind::Cancelled
                | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::InvalidSource => "InvalidSource",
            ErrorKind::FrameCaptureFailure => "FrameCaptureFailure",
            ErrorKind::EncoderFailure => "EncoderFailure",
            ErrorKind::AudioStageFailure => "AudioStageFailure",
            ErrorKind::MuxFinalizeFailure => "MuxFinalizeFailure",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Request rejected before any work started (end <= start, negative start)
    InvalidRequest(String),
    /// Source dimensions or duration are unusable
    InvalidSource(String),
    /// Drawing a decoded frame into the working surface failed
    FrameCaptureFailure(String),
    /// Codec-level error from a video or audio encoder
    EncoderFailure(String),
    /// Audio decode, render or encode failed
    AudioStageFailure(String),
    /// Container could not be serialized
    MuxFinalizeFailure(String),
    /// Export was cancelled at a suspension point
    Cancelled,
    /// Internal error
    Internal(String),
}

impl DomainError {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DomainError::InvalidSource(_) => ErrorKind::InvalidSource,
            DomainError::FrameCaptureFailure(_) => ErrorKind::FrameCaptureFailure,
            DomainError::EncoderFailure(_) => ErrorKind::EncoderFailure,
            DomainError::AudioStageFailure(_) => ErrorKind::AudioStageFailure,
            DomainError::MuxFinalizeFailure(_) => ErrorKind::MuxFinalizeFailure,
            DomainError::Cancelled => ErrorKind::Cancelled,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Single user-facing message, the same for every fatal kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DomainError::Cancelled => "Export cancelled.",
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }

    /// Convert into a warning attributed to an optional frame
    pub fn into_warning(self, frame_index: Option<u64>) -> ExportWarning {
        ExportWarning {
            kind: self.kind(),
            frame_index,
            message: self.to_string(),
        }
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            DomainError::InvalidSource(msg) => write!(f, "Invalid source: {}", msg),
            DomainError::FrameCaptureFailure(msg) => write!(f, "Frame capture failed: {}", msg),
            DomainError::EncoderFailure(msg) => write!(f, "Encoder failure: {}", msg),
            DomainError::AudioStageFailure(msg) => write!(f, "Audio stage failed: {}", msg),
            DomainError::MuxFinalizeFailure(msg) => write!(f, "Mux finalize failed: {}", msg),
            DomainError::Cancelled => write!(f, "Export cancelled"),
            DomainError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}

/// Recoverable failure recorded while an export keeps going
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportWarning {
    pub kind: ErrorKind,
    /// Output frame the failure is attributed to, if any
    pub frame_index: Option<u64>,
    pub message: String,
}

impl fmt::Display for ExportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame_index {
            Some(index) => write!(f, "[{} @ frame {}] {}", self.kind, index, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        let errors = [
            DomainError::InvalidRequest("x".into()),
            DomainError::InvalidSource("x".into()),
            DomainError::FrameCaptureFailure("x".into()),
            DomainError::EncoderFailure("x".into()),
            DomainError::AudioStageFailure("x".into()),
            DomainError::MuxFinalizeFailure("x".into()),
            DomainError::Cancelled,
            DomainError::Internal("x".into()),
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_user_message_is_generic_for_fatal_kinds() {
        assert_eq!(
            DomainError::InvalidSource("no dimensions".into()).user_message(),
            GENERIC_FAILURE_MESSAGE
        );
        assert_eq!(
            DomainError::MuxFinalizeFailure("disk".into()).user_message(),
            GENERIC_FAILURE_MESSAGE
        );
    }

    #[test]
    fn test_default_fatality() {
        assert!(ErrorKind::InvalidRequest.is_fatal_by_default());
        assert!(ErrorKind::MuxFinalizeFailure.is_fatal_by_default());
        assert!(!ErrorKind::FrameCaptureFailure.is_fatal_by_default());
        assert!(!ErrorKind::EncoderFailure.is_fatal_by_default());
        assert!(!ErrorKind::AudioStageFailure.is_fatal_by_default());
    }

    #[test]
    fn test_into_warning_keeps_kind_and_frame() {
        let warning = DomainError::FrameCaptureFailure("draw threw".into()).into_warning(Some(12));
        assert_eq!(warning.kind, ErrorKind::FrameCaptureFailure);
        assert_eq!(warning.frame_index, Some(12));
        assert!(warning.to_string().contains("frame 12"));
    }
}
