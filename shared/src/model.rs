use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::history::HistoryStore;
use crate::overlay::RenderedSize;
use crate::{get_current_time_ms, AppError, UnixTimeMs, NORMALIZED_MAX};

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(EntryId);
typed_id!(RequestId);
typed_id!(ImageId);

// --- Detections ---

/// Box on the 0..=1000 scale, wire order `[ymin, xmin, ymax, xmax]`.
///
/// Coordinates above 1000 are clamped on construction and on decode, at any
/// magnitude. Negative or fractional coordinates never reach this type:
/// they fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u64; 4]", into = "[u16; 4]")]
pub struct NormalizedBox {
    ymin: u16,
    xmin: u16,
    ymax: u16,
    xmax: u16,
}

impl NormalizedBox {
    #[must_use]
    pub fn new(ymin: u16, xmin: u16, ymax: u16, xmax: u16) -> Self {
        Self {
            ymin: ymin.min(NORMALIZED_MAX),
            xmin: xmin.min(NORMALIZED_MAX),
            ymax: ymax.min(NORMALIZED_MAX),
            xmax: xmax.min(NORMALIZED_MAX),
        }
    }

    #[must_use]
    pub const fn ymin(&self) -> u16 {
        self.ymin
    }

    #[must_use]
    pub const fn xmin(&self) -> u16 {
        self.xmin
    }

    #[must_use]
    pub const fn ymax(&self) -> u16 {
        self.ymax
    }

    #[must_use]
    pub const fn xmax(&self) -> u16 {
        self.xmax
    }
}

impl From<[u16; 4]> for NormalizedBox {
    fn from([ymin, xmin, ymax, xmax]: [u16; 4]) -> Self {
        Self::new(ymin, xmin, ymax, xmax)
    }
}

impl From<[u64; 4]> for NormalizedBox {
    fn from(coords: [u64; 4]) -> Self {
        let [ymin, xmin, ymax, xmax] =
            coords.map(|v| u16::try_from(v).unwrap_or(u16::MAX).min(NORMALIZED_MAX));
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }
}

impl From<NormalizedBox> for [u16; 4] {
    fn from(b: NormalizedBox) -> Self {
        [b.ymin, b.xmin, b.ymax, b.xmax]
    }
}

/// One animal head reported by the vision service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Normalized bounding box of the head.
    #[serde(rename = "box_2d")]
    pub bounds: NormalizedBox,
    /// Free-text label, e.g. "Cow head".
    pub label: String,
    /// Species guess, shown on the overlay chip.
    pub species: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "totalCount")]
    pub total_count: u32,
    pub detections: Vec<Detection>,
    pub summary: String,
}

impl DetectionResult {
    /// Mean confidence over the enumerated detections, 0 when there are none.
    #[must_use]
    pub fn average_confidence(&self) -> f64 {
        let sum: f64 = self.detections.iter().map(|d| d.confidence).sum();
        #[allow(clippy::cast_precision_loss)]
        let len = self.detections.len().max(1) as f64;
        sum / len
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn average_confidence_percent(&self) -> u32 {
        (self.average_confidence() * 100.0).round().clamp(0.0, 100.0) as u32
    }

    /// Species of the first `limit` detections, repeats included, plus how
    /// many detections were left out.
    #[must_use]
    pub fn species_tags(&self, limit: usize) -> (Vec<String>, usize) {
        let shown = self
            .detections
            .iter()
            .take(limit)
            .map(|d| d.species.clone())
            .collect();
        (shown, self.detections.len().saturating_sub(limit))
    }
}

/// A past analysis. Created once on success and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub timestamp: UnixTimeMs,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub result: DetectionResult,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(image_url: String, result: DetectionResult) -> Self {
        Self {
            id: EntryId::generate(),
            timestamp: UnixTimeMs::now(),
            image_url,
            result,
        }
    }
}

// --- Images ---

/// An image ready for display and analysis, kept as base64 so the preview
/// data URL and the inline request payload share one encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StillImage {
    pub id: ImageId,
    pub mime_type: String,
    pub base64_data: String,
    pub byte_len: usize,
    /// Size the shell currently renders this image at; unknown until loaded.
    pub rendered_size: Option<RenderedSize>,
}

impl StillImage {
    #[must_use]
    pub fn new(mime_type: impl Into<String>, base64_data: String, byte_len: usize) -> Self {
        Self {
            id: ImageId::generate(),
            mime_type: mime_type.into(),
            base64_data,
            byte_len,
            rendered_size: None,
        }
    }

    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

// --- Modes and flows ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    #[default]
    Upload,
    Live,
    History,
}

/// Which flow displays an image and owns its analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySurface {
    Upload,
    Live,
}

/// Identifies one analysis call and carries the image it was made for, so a
/// success can be recorded even after the flow moved on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTicket {
    pub surface: DisplaySurface,
    pub request_id: RequestId,
    pub image: StillImage,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum UploadPhase {
    #[default]
    Idle,
    Previewing,
    Analyzing,
    Result(DetectionResult),
    Error(AppError),
}

impl UploadPhase {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Previewing => "previewing",
            Self::Analyzing => "analyzing",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UploadFlow {
    pub phase: UploadPhase,
    pub preview: Option<StillImage>,
    /// The analysis call still awaiting a response, possibly for a
    /// preview that has since been replaced.
    pub in_flight: Option<RequestId>,
    pub auto_analyze_pending: bool,
}

impl UploadFlow {
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.phase, UploadPhase::Analyzing)
    }

    #[must_use]
    pub fn can_analyze(&self) -> bool {
        self.preview.is_some()
            && self.in_flight.is_none()
            && matches!(self.phase, UploadPhase::Previewing | UploadPhase::Error(_))
    }

    #[must_use]
    pub fn result(&self) -> Option<&DetectionResult> {
        match &self.phase {
            UploadPhase::Result(result) => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&AppError> {
        match &self.phase {
            UploadPhase::Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    #[default]
    Off,
    Starting,
    On,
}

impl CameraState {
    #[must_use]
    pub const fn holds_device(self) -> bool {
        matches!(self, Self::Starting | Self::On)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivePending {
    Capturing,
    Analyzing(RequestId),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveFlow {
    pub camera: CameraState,
    /// Bumped on every start request so a late start result can be told
    /// apart from the current one.
    pub session: u64,
    pub pending: Option<LivePending>,
    pub stream_size: Option<(u32, u32)>,
    pub last_capture: Option<StillImage>,
    pub result: Option<DetectionResult>,
    pub error: Option<AppError>,
}

impl LiveFlow {
    #[must_use]
    pub fn can_capture(&self) -> bool {
        self.camera == CameraState::On && self.pending.is_none()
    }

    #[must_use]
    pub fn is_analyzing(&self) -> bool {
        matches!(self.pending, Some(LivePending::Analyzing(_)))
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&RequestId> {
        match &self.pending {
            Some(LivePending::Analyzing(id)) => Some(id),
            _ => None,
        }
    }
}

// --- Model ---

#[derive(Debug)]
pub struct Model {
    pub mode: AppMode,
    pub config: AppConfig,
    pub history: HistoryStore,
    pub upload: UploadFlow,
    pub live: LiveFlow,
    pub view_timestamp_ms: u64,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            mode: AppMode::default(),
            config: AppConfig::default(),
            history: HistoryStore::new(),
            upload: UploadFlow::default(),
            live: LiveFlow::default(),
            view_timestamp_ms: get_current_time_ms(),
        }
    }
}

impl Model {
    pub fn update_timestamp(&mut self) {
        self.view_timestamp_ms = get_current_time_ms();
    }

    /// The image currently shown on `surface`, if any.
    pub fn image_on_mut(&mut self, surface: DisplaySurface) -> Option<&mut StillImage> {
        match surface {
            DisplaySurface::Upload => self.upload.preview.as_mut(),
            DisplaySurface::Live => self.live.last_capture.as_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(species: &str, confidence: f64) -> Detection {
        Detection {
            bounds: NormalizedBox::new(100, 100, 200, 200),
            label: format!("{species} head"),
            species: species.into(),
            confidence,
        }
    }

    #[test]
    fn test_normalized_box_wire_order() {
        let b: NormalizedBox = serde_json::from_str("[10, 20, 30, 40]").expect("valid box");
        assert_eq!((b.ymin(), b.xmin(), b.ymax(), b.xmax()), (10, 20, 30, 40));
        assert_eq!(serde_json::to_string(&b).expect("serializes"), "[10,20,30,40]");
    }

    #[test]
    fn test_normalized_box_clamps_to_scale() {
        let b = NormalizedBox::new(0, 0, 1200, 1001);
        assert_eq!(b.ymax(), 1000);
        assert_eq!(b.xmax(), 1000);
    }

    #[test]
    fn test_normalized_box_clamps_wide_coordinates_on_decode() {
        let b: NormalizedBox =
            serde_json::from_str("[70000, 1500, 4294967296, 999]").expect("valid box");
        assert_eq!((b.ymin(), b.xmin(), b.ymax(), b.xmax()), (1000, 1000, 1000, 999));
    }

    #[test]
    fn test_normalized_box_rejects_negative_and_short() {
        assert!(serde_json::from_str::<NormalizedBox>("[-1, 0, 10, 10]").is_err());
        assert!(serde_json::from_str::<NormalizedBox>("[0, 0, 10]").is_err());
        assert!(serde_json::from_str::<NormalizedBox>("[0.5, 0, 10, 10]").is_err());
    }

    #[test]
    fn test_average_confidence() {
        let result = DetectionResult {
            total_count: 2,
            detections: vec![detection("Cow", 0.9), detection("Cow", 0.7)],
            summary: String::new(),
        };
        assert!((result.average_confidence() - 0.8).abs() < 1e-9);
        assert_eq!(result.average_confidence_percent(), 80);
    }

    #[test]
    fn test_average_confidence_empty_is_zero() {
        let result = DetectionResult {
            total_count: 3,
            detections: vec![],
            summary: "Heads reported without boxes".into(),
        };
        assert!(result.average_confidence().abs() < f64::EPSILON);
    }

    #[test]
    fn test_species_tags_follow_detection_order() {
        let result = DetectionResult {
            total_count: 5,
            detections: vec![
                detection("Cow", 0.9),
                detection("Sheep", 0.9),
                detection("Cow", 0.9),
                detection("Goat", 0.9),
                detection("Horse", 0.9),
            ],
            summary: String::new(),
        };
        let (tags, hidden) = result.species_tags(3);
        assert_eq!(tags, vec!["Cow", "Sheep", "Cow"]);
        assert_eq!(hidden, 2);

        let (tags, hidden) = DetectionResult {
            detections: result.detections[..2].to_vec(),
            ..result
        }
        .species_tags(3);
        assert_eq!(tags, vec!["Cow", "Sheep"]);
        assert_eq!(hidden, 0);
    }

    #[test]
    fn test_history_entry_wire_names() {
        let entry = HistoryEntry {
            id: EntryId::new("abc"),
            timestamp: UnixTimeMs(42),
            image_url: "data:image/jpeg;base64,AAAA".into(),
            result: DetectionResult {
                total_count: 1,
                detections: vec![detection("Cow", 0.5)],
                summary: "One cow".into(),
            },
        };
        let json = serde_json::to_value(&entry).expect("serializes");
        assert_eq!(json["id"], "abc");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["imageUrl"], "data:image/jpeg;base64,AAAA");
        assert_eq!(json["result"]["totalCount"], 1);
        assert_eq!(json["result"]["detections"][0]["box_2d"][2], 200);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(EntryId::generate(), EntryId::generate());
    }

    #[test]
    fn test_still_image_data_url() {
        let image = StillImage::new("image/png", "iVBORw0".into(), 5);
        assert_eq!(image.data_url(), "data:image/png;base64,iVBORw0");
        assert!(image.rendered_size.is_none());
    }

    #[test]
    fn test_upload_can_analyze_only_when_idle_with_preview() {
        let mut flow = UploadFlow::default();
        assert!(!flow.can_analyze());

        flow.preview = Some(StillImage::new("image/jpeg", "AA".into(), 1));
        flow.phase = UploadPhase::Previewing;
        assert!(flow.can_analyze());

        flow.in_flight = Some(RequestId::generate());
        assert!(!flow.can_analyze());
    }

    #[test]
    fn test_live_can_capture_only_when_on_and_idle() {
        let mut flow = LiveFlow::default();
        assert!(!flow.can_capture());

        flow.camera = CameraState::On;
        assert!(flow.can_capture());

        flow.pending = Some(LivePending::Capturing);
        assert!(!flow.can_capture());
        assert!(!flow.is_analyzing());

        flow.pending = Some(LivePending::Analyzing(RequestId::new("r1")));
        assert!(flow.is_analyzing());
        assert_eq!(flow.in_flight(), Some(&RequestId::new("r1")));
    }
}
