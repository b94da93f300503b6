use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{FigurineStyle, ValidationStatus};

/// Request to create a figurine job from an uploaded image.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[garde(length(min = 1, max = 128))]
    pub user_id: String,

    #[garde(length(min = 1, max = 2048))]
    pub image_url: String,

    #[garde(skip)]
    pub style: FigurineStyle,
}

/// Request to run (or re-run) analysis. The image URL defaults to the job's
/// original image when omitted.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[garde(inner(length(min = 1, max = 2048)))]
    pub image_url: Option<String>,
}

/// Request to attach an additional image to a job awaiting one.
#[derive(Debug, Deserialize, Validate)]
pub struct AttachImageRequest {
    #[garde(length(min = 1, max = 2048))]
    pub image_url: String,
}

/// Response after analysis completes.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub analysis: AnalysisResult,
    pub validation_status: ValidationStatus,
}

/// Response after a validation-side transition (confirm, attach image).
#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub validation_status: ValidationStatus,
}

/// Response after a successful generation run.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub model_url: String,
    pub preview_url: Option<String>,
    pub message: String,
}

/// Uniform failure envelope: `{"success": false, "error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}
