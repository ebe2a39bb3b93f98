use serde::{Deserialize, Serialize};

use crate::capabilities::camera::StreamConfig;
use crate::vision::{DEFAULT_MODEL_NAME, DEFAULT_THINKING_BUDGET};
use crate::{DEFAULT_CAPTURE_JPEG_QUALITY, MAX_UPLOAD_BYTES};

pub const MAX_THINKING_BUDGET: u32 = 32_768;

/// Runtime settings supplied by the shell at startup.
///
/// Every field has a default, so a shell may send a partial JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model_name: String,
    pub thinking_budget: u32,
    pub capture_jpeg_quality: u8,
    pub max_upload_bytes: usize,
    pub auto_analyze_uploads: bool,
    pub stream: StreamConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            thinking_budget: DEFAULT_THINKING_BUDGET,
            capture_jpeg_quality: DEFAULT_CAPTURE_JPEG_QUALITY,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            auto_analyze_uploads: true,
            stream: StreamConfig::default(),
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = budget;
        self
    }

    #[must_use]
    pub fn with_capture_quality(mut self, quality: u8) -> Self {
        self.capture_jpeg_quality = quality;
        self
    }

    #[must_use]
    pub fn with_max_upload_bytes(mut self, max_bytes: usize) -> Self {
        self.max_upload_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn with_auto_analyze(mut self, enabled: bool) -> Self {
        self.auto_analyze_uploads = enabled;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Clamps out-of-range values instead of rejecting the whole config.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.model_name.trim().is_empty() {
            self.model_name = DEFAULT_MODEL_NAME.to_string();
        }
        self.thinking_budget = self.thinking_budget.min(MAX_THINKING_BUDGET);
        self.capture_jpeg_quality = self.capture_jpeg_quality.clamp(1, 100);
        if self.max_upload_bytes == 0 {
            self.max_upload_bytes = MAX_UPLOAD_BYTES;
        }
        self.stream = self.stream.validated();
        self
    }
}
