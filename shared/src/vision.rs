use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities::vision::{VisionError, VisionResult};
use crate::config::AppConfig;
use crate::model::{DetectionResult, StillImage};
use crate::{AppError, ErrorKind};

// ============================================================================
// Request constants
// ============================================================================

pub const DEFAULT_MODEL_NAME: &str = "gemini-3-pro-preview";
pub const DEFAULT_THINKING_BUDGET: u32 = 4000;
pub const RESPONSE_MIME_TYPE: &str = "application/json";

pub const SYSTEM_INSTRUCTION: &str = "You are an expert wildlife and livestock counter \
specialised in detecting animal heads in dense scenes. Detect EVERY animal head in the image: \
small or distant heads in the background, heads that are partially occluded by other animals, \
fences or vegetation, and heads cut off at the edge of the frame. In dense groups, separate \
individuals by their ears, eyes and snouts instead of merging them into one box. Be meticulous: \
a missed head is worse than a slightly loose box.";

pub const ANALYSIS_PROMPT: &str = "Detect all animal heads in this image. Return a bounding box \
for each head as [ymin, xmin, ymax, xmax] normalized to 0-1000, a short label, the species and \
your confidence between 0 and 1. Report the exact totalCount of heads and a one-sentence \
summary of the scene. Respond with JSON only.";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AnalysisError {
    #[error("the AI returned no data")]
    EmptyResponse,

    #[error("the AI response does not match the expected structure: {reason}")]
    MalformedResponse { reason: String },
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::EmptyResponse => {
                AppError::new(ErrorKind::EmptyResponse, "the AI returned no data")
            }
            AnalysisError::MalformedResponse { reason } => AppError::new(
                ErrorKind::MalformedResponse,
                "the AI response does not match the expected structure",
            )
            .with_internal(reason),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 without the `data:` prefix.
    pub data: String,
}

/// Everything the shell needs to make one analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub model: String,
    pub system_instruction: String,
    pub prompt: String,
    pub image: InlineImage,
    pub response_mime_type: String,
    pub response_schema: Value,
    pub thinking_budget: u32,
}

impl AnalysisRequest {
    #[must_use]
    pub fn for_image(image: &StillImage, config: &AppConfig) -> Self {
        Self {
            model: config.model_name.clone(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            prompt: ANALYSIS_PROMPT.to_string(),
            image: InlineImage {
                mime_type: image.mime_type.clone(),
                data: image.base64_data.clone(),
            },
            response_mime_type: RESPONSE_MIME_TYPE.to_string(),
            response_schema: response_schema(),
            thinking_budget: config.thinking_budget,
        }
    }

    /// Path of the REST method relative to the provider's API root.
    #[must_use]
    pub fn endpoint_path(&self) -> String {
        format!("v1beta/models/{}:generateContent", self.model)
    }

    /// JSON body for the provider's `generateContent` REST method.
    #[must_use]
    pub fn generate_content_body(&self) -> Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": self.system_instruction }]
            },
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": self.image.mime_type,
                            "data": self.image.data
                        }
                    },
                    { "text": self.prompt }
                ]
            }],
            "generationConfig": {
                "responseMimeType": self.response_mime_type,
                "responseSchema": self.response_schema,
                "thinkingConfig": { "thinkingBudget": self.thinking_budget }
            }
        })
    }
}

/// Output schema the provider enforces on its side.
#[must_use]
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "totalCount": {
                "type": "INTEGER",
                "description": "Total number of animal heads in the image."
            },
            "detections": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "box_2d": {
                            "type": "ARRAY",
                            "items": { "type": "INTEGER" },
                            "description": "[ymin, xmin, ymax, xmax] normalized to 0-1000."
                        },
                        "label": { "type": "STRING" },
                        "species": { "type": "STRING" },
                        "confidence": { "type": "NUMBER" }
                    },
                    "required": ["box_2d", "label", "species", "confidence"]
                }
            },
            "summary": {
                "type": "STRING",
                "description": "One-sentence description of the scene."
            }
        },
        "required": ["totalCount", "detections", "summary"]
    })
}

// ============================================================================
// Response
// ============================================================================

/// Decodes the model's JSON payload into a result.
///
/// `totalCount` is kept as reported even when it differs from the number
/// of enumerated detections.
#[instrument(skip(payload), fields(payload_len = payload.map_or(0, str::len)))]
pub fn parse_detection_result(payload: Option<&str>) -> Result<DetectionResult, AnalysisError> {
    let text = match payload.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => return Err(AnalysisError::EmptyResponse),
    };

    let mut result: DetectionResult =
        serde_json::from_str(text).map_err(|e| AnalysisError::MalformedResponse {
            reason: e.to_string(),
        })?;

    for detection in &mut result.detections {
        if !detection.confidence.is_finite() {
            return Err(AnalysisError::MalformedResponse {
                reason: "confidence is not a finite number".into(),
            });
        }
        detection.confidence = detection.confidence.clamp(0.0, 1.0);
    }

    debug!(
        total_count = result.total_count,
        detections = result.detections.len(),
        "analysis payload decoded"
    );
    Ok(result)
}

/// Turns the collaborator's answer into a result or a user-facing error.
pub fn interpret_outcome(outcome: VisionResult) -> Result<DetectionResult, AppError> {
    match outcome {
        Ok(response) => parse_detection_result(response.text.as_deref()).map_err(|e| {
            warn!(error = %e, "analysis response rejected");
            AppError::from(e)
        }),
        Err(e) => {
            warn!(error = %e, "analysis call failed");
            Err(AppError::from(e))
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

/// Pulls the answer text out of a raw `generateContent` response body.
///
/// Thought parts are skipped. Returns `Ok(None)` when the first candidate
/// carries no text at all.
pub fn extract_response_text(body: &[u8]) -> Result<Option<String>, VisionError> {
    let response: GenerateContentResponse =
        serde_json::from_slice(body).map_err(|e| VisionError::Transport {
            message: format!("unreadable provider response: {e}"),
        })?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}
