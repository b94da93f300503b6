use serde::{Deserialize, Serialize};

use crate::models::job::ModelType;

/// Category the vision classifier assigned to the image subject. Drives the
/// validation transition a job takes after analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Classification {
    #[serde(rename = "HEAD_MODEL")]
    HeadModel,
    #[serde(rename = "BUILDING_MODEL")]
    BuildingModel,
    #[serde(rename = "ANIMAL_MODEL")]
    AnimalModel,
    #[serde(rename = "FALLBACK_MODEL")]
    FallbackModel,
    #[serde(rename = "REJECT_IMAGE")]
    RejectImage,
}

impl Classification {
    /// The model type to record on the job, if the image was not rejected.
    pub fn model_type(self) -> Option<ModelType> {
        match self {
            Classification::HeadModel => Some(ModelType::HeadModel),
            Classification::BuildingModel => Some(ModelType::BuildingModel),
            Classification::AnimalModel => Some(ModelType::AnimalModel),
            Classification::FallbackModel => Some(ModelType::FallbackModel),
            Classification::RejectImage => None,
        }
    }
}

/// Normalized result of a vision-classification call. The classifier is
/// instructed to answer with exactly this JSON shape; missing optional
/// fields default rather than failing the parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub classification: Classification,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub detected_object: String,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub quality_issues: Vec<String>,
    #[serde(default)]
    pub needs_additional_images: bool,
    #[serde(default)]
    pub additional_image_request: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub can_proceed: bool,
    #[serde(default)]
    pub recommendation: String,
}

impl AnalysisResult {
    /// Fail-closed result synthesized when the classifier response cannot be
    /// parsed. The image is rejected, no credits are touched, and the user
    /// is told to retry with a clearer image.
    pub fn rejected_unparseable() -> Self {
        Self {
            classification: Classification::RejectImage,
            confidence: 0.0,
            detected_object: "Unknown".to_string(),
            quality_score: 0.0,
            quality_issues: vec!["Failed to analyze image".to_string()],
            needs_additional_images: false,
            additional_image_request: None,
            rejection_reason: Some(
                "Image analysis failed. Please try a different image.".to_string(),
            ),
            can_proceed: false,
            recommendation: "Please upload a clearer image.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classifier_shape() {
        let raw = r#"{
            "classification": "HEAD_MODEL",
            "confidence": 0.92,
            "detected_object": "human head, frontal view",
            "quality_score": 0.88,
            "quality_issues": [],
            "needs_additional_images": false,
            "additional_image_request": null,
            "rejection_reason": null,
            "can_proceed": true,
            "recommendation": "Good to proceed."
        }"#;

        let result: AnalysisResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.classification, Classification::HeadModel);
        assert!(result.can_proceed);
        assert_eq!(result.classification.model_type(), Some(ModelType::HeadModel));
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"classification": "REJECT_IMAGE", "rejection_reason": "too blurry"}"#;
        let result: AnalysisResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.classification, Classification::RejectImage);
        assert!(!result.can_proceed);
        assert!(result.classification.model_type().is_none());
    }

    #[test]
    fn fail_closed_result_cannot_proceed() {
        let result = AnalysisResult::rejected_unparseable();
        assert_eq!(result.classification, Classification::RejectImage);
        assert!(!result.can_proceed);
        assert!(result.rejection_reason.is_some());
    }
}
