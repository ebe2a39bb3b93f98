use serde::{Deserialize, Serialize};

use crate::model::{AppMode, CameraState, DetectionResult, HistoryEntry, StillImage};
use crate::overlay::{render_overlay, OverlayFrame};
use crate::{format_time_ago, AppError, ErrorSeverity, SPECIES_TAG_LIMIT};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[must_use]
pub fn heads_label(count: u32) -> String {
    if count == 1 {
        "1 head".into()
    } else {
        format!("{count} heads")
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(confidence: f64) -> u32 {
    (confidence * 100.0).round().clamp(0.0, 100.0) as u32
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionRow {
    pub index: usize,
    pub label: String,
    pub species: String,
    pub confidence_percent: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResultView {
    pub total_count: u32,
    pub count_label: String,
    pub summary: String,
    pub average_confidence_percent: u32,
    pub detections: Vec<DetectionRow>,
}

impl From<&DetectionResult> for ResultView {
    fn from(result: &DetectionResult) -> Self {
        Self {
            total_count: result.total_count,
            count_label: heads_label(result.total_count),
            summary: result.summary.clone(),
            average_confidence_percent: result.average_confidence_percent(),
            detections: result
                .detections
                .iter()
                .enumerate()
                .map(|(i, d)| DetectionRow {
                    index: i + 1,
                    label: d.label.clone(),
                    species: d.species.clone(),
                    confidence_percent: percent(d.confidence),
                })
                .collect(),
        }
    }
}

/// An image with the overlay to paint over it at its current rendered size.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageView {
    pub image_id: String,
    pub url: String,
    pub overlay: OverlayFrame,
}

impl ImageView {
    pub(crate) fn new(image: &StillImage, result: Option<&DetectionResult>) -> Self {
        let detections = result.map_or(&[][..], |r| r.detections.as_slice());
        Self {
            image_id: image.id.to_string(),
            url: image.data_url(),
            overlay: render_overlay(image.rendered_size, detections),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadView {
    pub phase: String,
    pub image: Option<ImageView>,
    pub is_loading: bool,
    pub can_analyze: bool,
    pub result: Option<ResultView>,
    pub error: Option<UserFacingError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LiveView {
    pub camera: CameraState,
    pub can_start: bool,
    pub can_capture: bool,
    pub is_analyzing: bool,
    pub last_capture: Option<ImageView>,
    pub result: Option<ResultView>,
    pub error: Option<UserFacingError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryCard {
    pub id: String,
    pub image_url: String,
    pub total_count: u32,
    pub count_label: String,
    pub time_label: String,
    pub timestamp_ms: u64,
    pub summary: String,
    pub species_tags: Vec<String>,
    pub more_species_label: Option<String>,
}

impl HistoryCard {
    pub(crate) fn new(entry: &HistoryEntry, now_ms: u64) -> Self {
        let (species_tags, hidden) = entry.result.species_tags(SPECIES_TAG_LIMIT);
        Self {
            id: entry.id.to_string(),
            image_url: entry.image_url.clone(),
            total_count: entry.result.total_count,
            count_label: heads_label(entry.result.total_count),
            time_label: format_time_ago(entry.timestamp.as_millis(), now_ms),
            timestamp_ms: entry.timestamp.as_millis(),
            summary: entry.result.summary.clone(),
            species_tags,
            more_species_label: (hidden > 0).then(|| format!("+{hidden} more")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryView {
    pub cards: Vec<HistoryCard>,
    pub can_clear: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub mode: AppMode,
    pub upload: UploadView,
    pub live: LiveView,
    pub history: HistoryView,
    pub history_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Detection, EntryId, NormalizedBox};
    use crate::overlay::RenderedSize;
    use crate::{ErrorKind, UnixTimeMs};

    fn result(species: &[&str]) -> DetectionResult {
        DetectionResult {
            total_count: u32::try_from(species.len()).unwrap_or(u32::MAX),
            detections: species
                .iter()
                .map(|s| Detection {
                    bounds: NormalizedBox::new(0, 0, 500, 500),
                    label: format!("{s} head"),
                    species: (*s).to_string(),
                    confidence: 0.876,
                })
                .collect(),
            summary: "A field.".into(),
        }
    }

    #[test]
    fn test_heads_label_pluralizes() {
        assert_eq!(heads_label(0), "0 heads");
        assert_eq!(heads_label(1), "1 head");
        assert_eq!(heads_label(12), "12 heads");
    }

    #[test]
    fn test_result_view_rows() {
        let view = ResultView::from(&result(&["Cow", "Sheep"]));
        assert_eq!(view.count_label, "2 heads");
        assert_eq!(view.average_confidence_percent, 88);
        assert_eq!(view.detections[1].index, 2);
        assert_eq!(view.detections[1].confidence_percent, 88);
    }

    #[test]
    fn test_history_card_species_overflow() {
        let entry = HistoryEntry {
            id: EntryId::new("e1"),
            timestamp: UnixTimeMs(1_000),
            image_url: "data:image/jpeg;base64,AA".into(),
            result: result(&["Cow", "Sheep", "Goat", "Horse", "Pig"]),
        };
        let card = HistoryCard::new(&entry, 61_000);
        assert_eq!(card.species_tags, vec!["Cow", "Sheep", "Goat"]);
        assert_eq!(card.more_species_label.as_deref(), Some("+2 more"));
        assert_eq!(card.time_label, "1m ago");
        assert_eq!(card.count_label, "5 heads");
    }

    #[test]
    fn test_history_card_tags_keep_repeated_species() {
        let entry = HistoryEntry {
            id: EntryId::new("e2"),
            timestamp: UnixTimeMs(5_000),
            image_url: "data:image/jpeg;base64,AA".into(),
            result: result(&["Cow", "Cow", "Sheep", "Cow"]),
        };
        let card = HistoryCard::new(&entry, 5_000 + 3 * 3_600_000);
        assert_eq!(card.species_tags, vec!["Cow", "Cow", "Sheep"]);
        assert_eq!(card.more_species_label.as_deref(), Some("+1 more"));
        assert_eq!(card.time_label, "3h ago");
        assert_eq!(card.timestamp_ms, 5_000);
    }

    #[test]
    fn test_image_view_without_size_has_no_boxes() {
        let mut image = StillImage::new("image/jpeg", "AA".into(), 1);
        let detected = result(&["Cow"]);

        let view = ImageView::new(&image, Some(&detected));
        assert!(view.overlay.boxes.is_empty());

        image.rendered_size = RenderedSize::new(200.0, 100.0);
        let view = ImageView::new(&image, Some(&detected));
        assert_eq!(view.overlay.boxes.len(), 1);
        assert!((view.overlay.boxes[0].rect.width - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_user_facing_error_projection() {
        let err = AppError::new(ErrorKind::MalformedResponse, "bad");
        let view = UserFacingError::from(&err);
        assert_eq!(view.error_code, "MALFORMED_RESPONSE");
        assert!(view.is_retryable);
        assert!(view.is_transient);
    }
}
