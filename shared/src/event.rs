use serde::{Deserialize, Serialize};

use crate::capabilities::{CameraResult, KvResult, VisionResult};
use crate::config::AppConfig;
use crate::model::{AnalysisTicket, AppMode, DisplaySurface, ImageId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    AppStarted,
    ConfigUpdated(Box<AppConfig>),
    ModeSelected(AppMode),

    // Upload flow
    FileSelected {
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
        file_name: Option<String>,
    },
    AnalyzeUploadRequested,

    // Live flow
    StartCameraRequested,
    StopCameraRequested,
    CaptureRequested,

    // Overlay sizing, reported by the shell
    ImageLoaded {
        image_id: ImageId,
        width: f64,
        height: f64,
    },
    ViewportResized {
        surface: DisplaySurface,
        width: f64,
        height: f64,
    },

    ClearHistoryRequested,

    // Capability responses
    #[serde(skip)]
    CameraStarted {
        session: u64,
        result: Box<CameraResult>,
    },
    #[serde(skip)]
    FrameCaptured(Box<CameraResult>),
    #[serde(skip)]
    AnalysisCompleted {
        ticket: Box<AnalysisTicket>,
        outcome: Box<VisionResult>,
    },
    #[serde(skip)]
    HistoryLoaded(Box<KvResult>),
    #[serde(skip)]
    HistoryPersisted(Box<KvResult>),
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AppStarted => "app_started",
            Self::ConfigUpdated(_) => "config_updated",
            Self::ModeSelected(_) => "mode_selected",
            Self::FileSelected { .. } => "file_selected",
            Self::AnalyzeUploadRequested => "analyze_upload_requested",
            Self::StartCameraRequested => "start_camera_requested",
            Self::StopCameraRequested => "stop_camera_requested",
            Self::CaptureRequested => "capture_requested",
            Self::ImageLoaded { .. } => "image_loaded",
            Self::ViewportResized { .. } => "viewport_resized",
            Self::ClearHistoryRequested => "clear_history_requested",
            Self::CameraStarted { .. } => "camera_started",
            Self::FrameCaptured(_) => "frame_captured",
            Self::AnalysisCompleted { .. } => "analysis_completed",
            Self::HistoryLoaded(_) => "history_loaded",
            Self::HistoryPersisted(_) => "history_persisted",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ModeSelected(_)
                | Self::FileSelected { .. }
                | Self::AnalyzeUploadRequested
                | Self::StartCameraRequested
                | Self::StopCameraRequested
                | Self::CaptureRequested
                | Self::ClearHistoryRequested
        )
    }
}
