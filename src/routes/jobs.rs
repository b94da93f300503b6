use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    AnalyzeRequest, AnalyzeResponse, AttachImageRequest, CreateJobRequest, ErrorResponse,
    GenerateResponse, TransitionResponse,
};
use crate::models::job::{FigurineJob, NewJob, ValidationStatus};
use crate::services::analysis::AnalysisError;
use crate::services::lifecycle::LifecycleError;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: LifecycleError) -> ApiError {
    let status = match &err {
        LifecycleError::JobNotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidState { .. }
        | LifecycleError::NotApproved(_)
        | LifecycleError::AlreadyProcessing(_)
        | LifecycleError::AlreadyFinished(_) => StatusCode::CONFLICT,
        LifecycleError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
        LifecycleError::Analysis(AnalysisError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        LifecycleError::Analysis(AnalysisError::QuotaExhausted) => StatusCode::PAYMENT_REQUIRED,
        LifecycleError::Analysis(_) | LifecycleError::Generation(_) => StatusCode::BAD_GATEWAY,
        LifecycleError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse { success: false, error: err.to_string() }),
    )
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { success: false, error: message }),
    )
}

/// POST /api/v1/jobs — create a job for an uploaded image.
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<FigurineJob>), ApiError> {
    req.validate().map_err(|e| bad_request(e.to_string()))?;

    let job = state
        .lifecycle
        .create(NewJob {
            user_id: req.user_id,
            original_image_url: req.image_url,
            style: req.style,
        })
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs/:job_id — the persisted job row.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<FigurineJob>, ApiError> {
    let job = state.lifecycle.get(job_id).await.map_err(error_response)?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/:job_id/analyze — classify the image and apply the
/// transition policy.
pub async fn analyze_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate().map_err(|e| bad_request(e.to_string()))?;

    let (analysis, validation_status) = state
        .lifecycle
        .analyze(job_id, req.image_url.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(AnalyzeResponse {
        success: true,
        job_id,
        analysis,
        validation_status,
    }))
}

/// POST /api/v1/jobs/:job_id/confirm — explicit user confirmation for an
/// ambiguous classification.
pub async fn confirm_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let validation_status = state
        .lifecycle
        .confirm(job_id)
        .await
        .map_err(error_response)?;

    Ok(Json(TransitionResponse { success: true, job_id, validation_status }))
}

/// POST /api/v1/jobs/:job_id/images — attach the requested additional image.
pub async fn attach_image(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<AttachImageRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    req.validate().map_err(|e| bad_request(e.to_string()))?;

    let validation_status = state
        .lifecycle
        .add_image(job_id, &req.image_url)
        .await
        .map_err(error_response)?;

    Ok(Json(TransitionResponse { success: true, job_id, validation_status }))
}

/// POST /api/v1/jobs/:job_id/generate — run the 3D generation attempt.
/// On failure the job is marked failed and any consumed credits are
/// refunded before the error is returned.
pub async fn generate_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let success = state
        .lifecycle
        .generate(job_id)
        .await
        .map_err(error_response)?;

    Ok(Json(GenerateResponse {
        success: true,
        job_id,
        model_url: success.model_url,
        preview_url: success.preview_url,
        message: "3D model generated successfully".to_string(),
    }))
}

/// POST /api/v1/jobs/:job_id/cancel — force a pending/processing job into
/// failed, refunding consumed credits.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    state.lifecycle.cancel(job_id).await.map_err(error_response)?;

    Ok(Json(TransitionResponse {
        success: true,
        job_id,
        validation_status: ValidationStatus::Failed,
    }))
}

/// POST /api/v1/jobs/:job_id/reject — the user reviewed a finished model and
/// did not accept it; refund and allow a fresh submission.
pub async fn reject_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    state
        .lifecycle
        .reject_model(job_id)
        .await
        .map_err(error_response)?;

    Ok(Json(TransitionResponse {
        success: true,
        job_id,
        validation_status: ValidationStatus::Rejected,
    }))
}
