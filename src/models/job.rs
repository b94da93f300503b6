use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Generation-execution state of a job, distinct from [`ValidationStatus`].
/// Generation and validation have different retry/refund rules, so the two
/// fields are kept separate and never conflated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Analysis/confirmation workflow state. Single source of truth for what
/// action is next on a job.
///
/// `rejected`, `needs_more_images` and `awaiting_confirmation` are terminal
/// for the current analysis attempt: each needs new input (a new image, an
/// extra image, or an explicit confirmation) before the job re-enters the
/// flow. Supplying that input forces `approved` directly, without a second
/// analysis call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Analyzing,
    Rejected,
    NeedsMoreImages,
    AwaitingConfirmation,
    Approved,
    Processing,
    Completed,
    Failed,
}

/// Figurine style chosen at creation, immutable afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FigurineStyle {
    Realistic,
    Anime,
    Lego,
    Fortnite,
}

/// Classification outcome assigned by image analysis. Set once; corrected
/// only by re-analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    #[serde(rename = "HEAD_MODEL")]
    HeadModel,
    #[serde(rename = "BUILDING_MODEL")]
    BuildingModel,
    #[serde(rename = "ANIMAL_MODEL")]
    AnimalModel,
    #[serde(rename = "FALLBACK_MODEL")]
    FallbackModel,
}

/// A figurine generation job: one user-submitted image's journey from upload
/// to finished 3D asset or terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigurineJob {
    pub id: Uuid,
    pub user_id: String,
    pub original_image_url: String,
    pub additional_images: Vec<String>,
    pub style: FigurineStyle,
    pub model_type: Option<ModelType>,
    pub validation_status: ValidationStatus,
    pub status: JobStatus,
    pub quality_report: Option<serde_json::Value>,
    pub detected_object: Option<String>,
    pub rejection_reason: Option<String>,
    pub error_message: Option<String>,
    pub user_confirmed: bool,
    /// True only while a deduction exists for this job and has not been
    /// refunded. Guards against double-deduct and double-refund.
    pub credits_consumed: bool,
    pub credits_cost: i64,
    pub model_url: Option<String>,
    pub preview_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: String,
    pub original_image_url: String,
    pub style: FigurineStyle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ValidationStatus::Pending,
            ValidationStatus::Analyzing,
            ValidationStatus::Rejected,
            ValidationStatus::NeedsMoreImages,
            ValidationStatus::AwaitingConfirmation,
            ValidationStatus::Approved,
            ValidationStatus::Processing,
            ValidationStatus::Completed,
            ValidationStatus::Failed,
        ] {
            let text = status.to_string();
            assert_eq!(ValidationStatus::from_str(&text).unwrap(), status);
        }
    }

    #[test]
    fn validation_status_uses_snake_case_columns() {
        assert_eq!(
            ValidationStatus::AwaitingConfirmation.to_string(),
            "awaiting_confirmation"
        );
        assert_eq!(
            ValidationStatus::NeedsMoreImages.to_string(),
            "needs_more_images"
        );
    }

    #[test]
    fn model_type_matches_classifier_labels() {
        assert_eq!(ModelType::HeadModel.to_string(), "HEAD_MODEL");
        assert_eq!(
            ModelType::from_str("FALLBACK_MODEL").unwrap(),
            ModelType::FallbackModel
        );
    }
}
