use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::models::analysis::AnalysisResult;

/// Classification rubric sent as the system prompt on every analysis call.
const ANALYSIS_PROMPT: &str = r#"You are an AI image analyzer for a 3D model generation service. Analyze the uploaded image and determine if it can be converted into a 3D model.

CLASSIFICATION RULES:
1. HEAD_MODEL - Human head/face photos
   - Requires: Clear frontal or side view of a human head
   - Check: Face visibility, lighting quality, no obstructions

2. BUILDING_MODEL - Architecture/buildings
   - Requires: Visible structure edges and building shape
   - Check: Not heavily distorted, clear geometry visible

3. ANIMAL_MODEL - Animals
   - Requires: Full body visible including head and legs
   - Check: Not cropped, animal clearly identifiable

4. FALLBACK_MODEL - Other clear objects
   - Use when: Image doesn't fit above categories BUT contains ONE clear, dominant object
   - Examples: bicycle, backpack, toy, chair, car, statue, tool, device
   - Check: Object has clear geometry, is centered, and can be 3D reconstructed

5. REJECT_IMAGE - Cannot be processed
   - Use when: Image is too blurred, too dark, has overlapping objects, incorrectly cropped, or no clear subject

RESPONSE FORMAT (JSON only, no markdown):
{
  "classification": "HEAD_MODEL" | "BUILDING_MODEL" | "ANIMAL_MODEL" | "FALLBACK_MODEL" | "REJECT_IMAGE",
  "confidence": 0.0-1.0,
  "detected_object": "description of what was detected",
  "quality_score": 0.0-1.0,
  "quality_issues": ["list of any quality issues"],
  "needs_additional_images": boolean,
  "additional_image_request": "what additional angle is needed if any",
  "rejection_reason": "reason if rejected, null otherwise",
  "can_proceed": boolean,
  "recommendation": "brief recommendation for the user"
}"#;

/// Wraps the external vision-classification call behind a typed result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn analyze(&self, image_url: &str) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream 429 — retryable later, credits untouched.
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    /// Upstream 402 — the AI service account is out of quota.
    #[error("AI service credits exhausted.")]
    QuotaExhausted,

    #[error("AI service returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("AI service returned an empty response")]
    EmptyResponse,
}

/// Client for an OpenAI-compatible multimodal chat endpoint.
pub struct VisionAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl VisionAiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisGateway for VisionAiClient {
    async fn analyze(&self, image_url: &str) -> Result<AnalysisResult, AnalysisError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": ANALYSIS_PROMPT },
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": "Analyze this image and classify it for 3D model generation. Respond with JSON only."
                        },
                        { "type": "image_url", "image_url": { "url": image_url } }
                    ]
                }
            ],
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(AnalysisError::RateLimited),
            StatusCode::PAYMENT_REQUIRED => return Err(AnalysisError::QuotaExhausted),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(status = %status, body = %body, "vision AI call failed");
                return Err(AnalysisError::Upstream { status, body });
            }
            _ => {}
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(AnalysisError::EmptyResponse)?;

        Ok(parse_analysis_text(&content))
    }
}

/// Parse the classifier's free-text answer into an [`AnalysisResult`].
///
/// The model is told to answer with bare JSON but occasionally fences it in
/// a markdown code block, so fences are stripped before parsing. A response
/// that still fails to parse fails closed: the image is rejected rather than
/// letting malformed output pass as approved.
pub(crate) fn parse_analysis_text(text: &str) -> AnalysisResult {
    let cleaned = strip_code_fences(text);

    match serde_json::from_str(cleaned) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse classifier response, rejecting image");
            AnalysisResult::rejected_unparseable()
        }
    }
}

fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::Classification;

    #[test]
    fn parses_bare_json() {
        let result = parse_analysis_text(
            r#"{"classification": "ANIMAL_MODEL", "can_proceed": true, "confidence": 0.8}"#,
        );
        assert_eq!(result.classification, Classification::AnimalModel);
        assert!(result.can_proceed);
    }

    #[test]
    fn strips_json_code_fence() {
        let fenced = "```json\n{\"classification\": \"HEAD_MODEL\", \"can_proceed\": true}\n```";
        let result = parse_analysis_text(fenced);
        assert_eq!(result.classification, Classification::HeadModel);
    }

    #[test]
    fn strips_plain_code_fence() {
        let fenced = "```\n{\"classification\": \"BUILDING_MODEL\", \"can_proceed\": true}\n```";
        let result = parse_analysis_text(fenced);
        assert_eq!(result.classification, Classification::BuildingModel);
    }

    #[test]
    fn malformed_response_fails_closed() {
        let result = parse_analysis_text("I could not analyze this image, sorry!");
        assert_eq!(result.classification, Classification::RejectImage);
        assert!(!result.can_proceed);
        assert!(result.rejection_reason.is_some());
    }

    #[test]
    fn truncated_json_fails_closed() {
        let result = parse_analysis_text(r#"{"classification": "HEAD_MODEL", "conf"#);
        assert_eq!(result.classification, Classification::RejectImage);
        assert!(!result.can_proceed);
    }
}
