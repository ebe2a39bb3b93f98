// lib.rs - ZooCount application core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod event;
pub mod history;
pub mod image_processing;
pub mod model;
pub mod overlay;
pub mod view;
pub mod vision;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::AppConfig;
pub use event::Event;
pub use history::HistoryStore;
pub use model::{
    AppMode, CameraState, Detection, DetectionResult, DisplaySurface, HistoryEntry, LiveFlow,
    Model, NormalizedBox, StillImage, UploadFlow, UploadPhase,
};
pub use view::ViewModel;

pub const HISTORY_CAPACITY: usize = 20;
pub const HISTORY_STORAGE_KEY: &str = "zoocount_history";
pub const NORMALIZED_SCALE: f64 = 1000.0;
pub const NORMALIZED_MAX: u16 = 1000;
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_FRAME_DIMENSION: u32 = 4096;
pub const DEFAULT_CAPTURE_JPEG_QUALITY: u8 = 80;
pub const SPECIES_TAG_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Authentication,
    RateLimited,
    AnalysisRejected,
    EmptyResponse,
    MalformedResponse,
    Storage,
    PersistenceReadFailure,
    Serialization,
    ImageProcessing,
    ImageTooLarge,
    ImageDimensionsTooLarge,
    ImageFormatUnsupported,
    Camera,
    CameraPermissionDenied,
    CameraBusy,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Authentication => "AUTH_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::AnalysisRejected => "ANALYSIS_REJECTED",
            Self::EmptyResponse => "EMPTY_RESPONSE",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
            Self::Storage => "STORAGE_ERROR",
            Self::PersistenceReadFailure => "PERSISTENCE_READ_FAILURE",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::ImageProcessing => "IMAGE_PROCESSING_ERROR",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::ImageDimensionsTooLarge => "IMAGE_DIMENSIONS_TOO_LARGE",
            Self::ImageFormatUnsupported => "IMAGE_FORMAT_UNSUPPORTED",
            Self::Camera => "CAMERA_ERROR",
            Self::CameraPermissionDenied => "CAMERA_PERMISSION_DENIED",
            Self::CameraBusy => "CAMERA_BUSY",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::RateLimited
            | Self::Storage
            | Self::Camera
            | Self::CameraBusy
            | Self::EmptyResponse
            | Self::MalformedResponse => ErrorSeverity::Transient,

            Self::Serialization | Self::Internal => ErrorSeverity::Fatal,

            Self::Authentication
            | Self::AnalysisRejected
            | Self::PersistenceReadFailure
            | Self::ImageProcessing
            | Self::ImageTooLarge
            | Self::ImageDimensionsTooLarge
            | Self::ImageFormatUnsupported
            | Self::CameraPermissionDenied => ErrorSeverity::Permanent,
        }
    }

    /// Whether re-triggering the same action by hand may succeed. Nothing in
    /// the core retries on its own.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::RateLimited
                | Self::Storage
                | Self::Camera
                | Self::CameraBusy
                | Self::EmptyResponse
                | Self::MalformedResponse
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub retry_after_ms: Option<u64>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            retry_after_ms: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to reach the analysis service. Please check your connection and try again."
                    .into()
            }
            ErrorKind::Authentication => {
                "The analysis service rejected the configured credential.".into()
            }
            ErrorKind::RateLimited => {
                if let Some(retry_after) = self.retry_after_ms {
                    let seconds = retry_after.div_ceil(1000);
                    format!("Too many requests. Please wait {seconds} seconds and try again.")
                } else {
                    "Too many requests. Please wait a moment and try again.".into()
                }
            }
            ErrorKind::AnalysisRejected => {
                "The analysis service could not process this image.".into()
            }
            ErrorKind::EmptyResponse => "The AI returned no data. Please try again.".into(),
            ErrorKind::MalformedResponse => {
                "The AI response had an unexpected structure. Please try again.".into()
            }
            ErrorKind::Storage => "Unable to save history on this device.".into(),
            ErrorKind::PersistenceReadFailure => "Saved history could not be read.".into(),
            ErrorKind::Serialization => {
                "A data error occurred. Please restart the app if this persists.".into()
            }
            ErrorKind::ImageProcessing => {
                "Unable to process the image. Please try a different photo.".into()
            }
            ErrorKind::ImageTooLarge => format!(
                "The image is too large. Please use an image smaller than {} MB.",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            ),
            ErrorKind::ImageDimensionsTooLarge => format!(
                "The image dimensions are too large. Maximum supported is {MAX_FRAME_DIMENSION}x{MAX_FRAME_DIMENSION} pixels."
            ),
            ErrorKind::ImageFormatUnsupported => {
                "This image format is not supported. Please use JPEG, PNG, or WebP.".into()
            }
            ErrorKind::Camera => "Camera error. Please stop and restart the camera.".into(),
            ErrorKind::CameraPermissionDenied => {
                "Could not access the camera. Please check permissions.".into()
            }
            ErrorKind::CameraBusy => {
                "The camera is in use by another application.".into()
            }
            ErrorKind::Internal => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("Image input is empty")]
    Empty,
    #[error("Image size {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("Image dimensions {width}x{height} exceed maximum of {max}x{max}")]
    DimensionsTooLarge { width: u32, height: u32, max: u32 },
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Invalid camera frame: {0}")]
    InvalidFrame(String),
    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),
    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),
}

impl From<ImageError> for AppError {
    fn from(e: ImageError) -> Self {
        let kind = match &e {
            ImageError::TooLarge { .. } => ErrorKind::ImageTooLarge,
            ImageError::DimensionsTooLarge { .. } => ErrorKind::ImageDimensionsTooLarge,
            ImageError::UnsupportedFormat => ErrorKind::ImageFormatUnsupported,
            ImageError::Empty
            | ImageError::InvalidFrame(_)
            | ImageError::DecodeFailed(_)
            | ImageError::EncodeFailed(_) => ErrorKind::ImageProcessing,
        };
        AppError::new(kind, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("History record could not be read: {0}")]
    ReadFailure(String),
    #[error("History record could not be written: {0}")]
    WriteFailure(String),
    #[error("History serialization failed: {0}")]
    SerializationFailed(String),
}

impl From<PersistenceError> for AppError {
    fn from(e: PersistenceError) -> Self {
        let (kind, message, detail) = match e {
            PersistenceError::ReadFailure(d) => {
                (ErrorKind::PersistenceReadFailure, "History record could not be read", d)
            }
            PersistenceError::WriteFailure(d) => {
                (ErrorKind::Storage, "History record could not be written", d)
            }
            PersistenceError::SerializationFailed(d) => {
                (ErrorKind::Serialization, "History serialization failed", d)
            }
        };
        AppError::new(kind, message).with_internal(detail)
    }
}

#[must_use]
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    if timestamp_ms > now_ms {
        return "Just now".into();
    }

    let diff_secs = now_ms.saturating_sub(timestamp_ms) / 1000;

    if diff_secs < 5 {
        return "Just now".into();
    }
    if diff_secs < 60 {
        return format!("{diff_secs}s ago");
    }

    let diff_mins = diff_secs / 60;
    if diff_mins < 60 {
        return format!("{diff_mins}m ago");
    }

    let diff_hours = diff_mins / 60;
    if diff_hours < 24 {
        return format!("{diff_hours}h ago");
    }

    let diff_days = diff_hours / 24;
    if diff_days < 7 {
        return format!("{diff_days}d ago");
    }
    if diff_days < 30 {
        return format!("{}w ago", diff_days / 7);
    }
    if diff_days < 365 {
        return format!("{}mo ago", diff_days / 30);
    }

    format!("{}y ago", diff_days / 365)
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl Default for UnixTimeMs {
    fn default() -> Self {
        Self::now()
    }
}
