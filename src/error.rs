use crate::CaptureStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Infrastructure failures around the capture pipeline.
///
/// These are never stored on a capture; classified destination failures are
/// expressed as [`crate::FailReason`] instead.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: CaptureStatus,
        to: CaptureStatus,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Image encoding failed: {0}")]
    EncodeError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CaptureError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CaptureError::InvalidUrl(_) => ErrorSeverity::Low,
            CaptureError::InvalidTransition { .. } => ErrorSeverity::Medium,
            CaptureError::ConfigurationError(_) => ErrorSeverity::High,
            CaptureError::StorageError(_) | CaptureError::QueueError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Why a single render strategy did not produce an image.
///
/// Strategy errors advance the renderer chain; they never fail a capture on
/// their own.
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("Timeout after {0:?}")]
    TimedOut(Duration),

    #[error("Process failed ({status}): {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("Process succeeded but dumped an empty file: {0}")]
    EmptyOutput(String),

    #[error("Failed to launch process: {0}")]
    LaunchFailed(String),

    #[error("Image decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Scratch storage error: {0}")]
    Scratch(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::SerializationError(err.to_string())
    }
}

impl<T> From<SendError<T>> for CaptureError {
    fn from(err: SendError<T>) -> Self {
        CaptureError::QueueError(err.to_string())
    }
}

impl From<image::ImageError> for StrategyError {
    fn from(err: image::ImageError) -> Self {
        StrategyError::DecodeFailed(err.to_string())
    }
}

impl From<std::io::Error> for StrategyError {
    fn from(err: std::io::Error) -> Self {
        StrategyError::Scratch(err.to_string())
    }
}
