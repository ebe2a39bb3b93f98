use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AppError, ErrorKind};

pub const DEFAULT_IDEAL_WIDTH: u32 = 1280;
pub const DEFAULT_IDEAL_HEIGHT: u32 = 720;
pub const MAX_IDEAL_DIMENSION: u32 = 4096;

/// Live video stream from a device camera.
///
/// The shell owns the device handles. Each `StartStream` opens one stream
/// tagged with its session; `StopStream` releases every track of the stream
/// opened under that session.
pub struct Camera<Ev> {
    context: CapabilityContext<CameraOperation, Ev>,
}

impl<Ev> Capability<Ev> for Camera<Ev> {
    type Operation = CameraOperation;
    type MappedSelf<MappedEv> = Camera<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Camera::new(self.context.map_event(f))
    }
}

impl<Ev> Camera<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<CameraOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn start_stream<F>(&self, session: u64, config: StreamConfig, make_event: F)
    where
        F: FnOnce(CameraResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        let config = config.validated();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(CameraOperation::StartStream { session, config })
                .await;
            context.update_app(make_event(result));
        });
    }

    pub fn capture_frame<F>(&self, make_event: F)
    where
        F: FnOnce(CameraResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(CameraOperation::CaptureFrame).await;
            context.update_app(make_event(result));
        });
    }

    /// Releases the stream opened under `session`. No response is expected.
    pub fn stop_stream(&self, session: u64) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(CameraOperation::StopStream { session })
                .await;
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraOperation {
    StartStream { session: u64, config: StreamConfig },
    CaptureFrame,
    StopStream { session: u64 },
}

impl Operation for CameraOperation {
    type Output = CameraResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    User,
    #[default]
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    pub facing: CameraFacing,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Environment,
            ideal_width: DEFAULT_IDEAL_WIDTH,
            ideal_height: DEFAULT_IDEAL_HEIGHT,
            audio: false,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn with_facing(mut self, facing: CameraFacing) -> Self {
        self.facing = facing;
        self
    }

    #[must_use]
    pub fn with_ideal_size(mut self, width: u32, height: u32) -> Self {
        self.ideal_width = width;
        self.ideal_height = height;
        self
    }

    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.ideal_width == 0 || self.ideal_height == 0 {
            self.ideal_width = DEFAULT_IDEAL_WIDTH;
            self.ideal_height = DEFAULT_IDEAL_HEIGHT;
        }
        self.ideal_width = self.ideal_width.min(MAX_IDEAL_DIMENSION);
        self.ideal_height = self.ideal_height.min(MAX_IDEAL_DIMENSION);
        self
    }
}

/// Pixels of one video frame as the shell grabbed them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FrameData {
    /// Already encoded by the platform (e.g. a canvas JPEG export).
    Encoded {
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
        mime_type: String,
    },
    /// Raw RGBA8, row-major, `width * height * 4` bytes.
    Rgba {
        width: u32,
        height: u32,
        #[serde(with = "serde_bytes")]
        pixels: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedFrame {
    pub data: FrameData,
    pub captured_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraOutput {
    StreamStarted { width: u32, height: u32 },
    Frame(CapturedFrame),
}

impl CameraOutput {
    #[must_use]
    pub fn into_frame(self) -> Option<CapturedFrame> {
        match self {
            CameraOutput::Frame(frame) => Some(frame),
            CameraOutput::StreamStarted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("camera is already in use")]
    DeviceBusy,

    #[error("capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("no active stream to capture from")]
    NoActiveStream,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CameraError {
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, CameraError::PermissionDenied)
    }
}

impl From<CameraError> for AppError {
    fn from(e: CameraError) -> Self {
        let kind = match &e {
            CameraError::PermissionDenied => ErrorKind::CameraPermissionDenied,
            CameraError::DeviceBusy => ErrorKind::CameraBusy,
            CameraError::Unavailable { .. }
            | CameraError::CaptureFailed { .. }
            | CameraError::NoActiveStream => ErrorKind::Camera,
            CameraError::Internal { .. } => ErrorKind::Internal,
        };
        AppError::new(kind, e.to_string())
    }
}

pub type CameraResult = Result<CameraOutput, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.facing, CameraFacing::Environment);
        assert_eq!((config.ideal_width, config.ideal_height), (1280, 720));
        assert!(!config.audio);
    }

    #[test]
    fn test_stream_config_validation() {
        let config = StreamConfig::default().with_ideal_size(0, 480).validated();
        assert_eq!((config.ideal_width, config.ideal_height), (1280, 720));

        let config = StreamConfig::default()
            .with_ideal_size(10_000, 10_000)
            .validated();
        assert_eq!(config.ideal_width, MAX_IDEAL_DIMENSION);
        assert_eq!(config.ideal_height, MAX_IDEAL_DIMENSION);
    }

    #[test]
    fn test_camera_error_conversion() {
        let err: AppError = CameraError::PermissionDenied.into();
        assert_eq!(err.kind, ErrorKind::CameraPermissionDenied);

        let err: AppError = CameraError::DeviceBusy.into();
        assert_eq!(err.kind, ErrorKind::CameraBusy);

        let err: AppError = CameraError::CaptureFailed {
            reason: "no frame".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Camera);
    }

    #[test]
    fn test_camera_output_into_frame() {
        let frame = CapturedFrame {
            data: FrameData::Encoded {
                bytes: vec![1, 2, 3],
                mime_type: "image/jpeg".into(),
            },
            captured_at_ms: 7,
        };
        assert_eq!(
            CameraOutput::Frame(frame.clone()).into_frame(),
            Some(frame)
        );
        assert_eq!(
            CameraOutput::StreamStarted {
                width: 1,
                height: 1
            }
            .into_frame(),
            None
        );
    }

    #[test]
    fn test_operation_serializes_with_config() {
        let op = CameraOperation::StartStream {
            session: 3,
            config: StreamConfig::default().with_facing(CameraFacing::User),
        };
        let json = serde_json::to_value(&op).expect("serializes");
        assert_eq!(json["StartStream"]["session"], 3);
        assert_eq!(json["StartStream"]["config"]["facing"], "user");

        let json = serde_json::to_value(CameraOperation::StopStream { session: 3 })
            .expect("serializes");
        assert_eq!(json["StopStream"]["session"], 3);
    }
}
