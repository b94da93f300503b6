use std::str::FromStr;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{
    FigurineJob, FigurineStyle, JobStatus, ModelType, NewJob, ValidationStatus,
};

/// Persistent record of figurine jobs. The conditional-update methods
/// (`try_begin_generation`, `confirm`, `add_additional_image`,
/// `reject_completed`) return whether the row was actually transitioned, so
/// concurrent callers are serialized by the database rather than by
/// in-process locks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new: NewJob) -> Result<FigurineJob, sqlx::Error>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<FigurineJob>, sqlx::Error>;

    async fn set_validation_status(
        &self,
        job_id: Uuid,
        status: ValidationStatus,
    ) -> Result<(), sqlx::Error>;

    /// Record an analysis outcome: classification, diagnostics and the new
    /// validation status, in one update. Analysis never consumes credits.
    async fn apply_analysis(
        &self,
        job_id: Uuid,
        analysis: &AnalysisResult,
        outcome: ValidationStatus,
    ) -> Result<(), sqlx::Error>;

    /// Record explicit user confirmation; only valid from
    /// `awaiting_confirmation`. Returns false if the job was in any other
    /// state.
    async fn confirm(&self, job_id: Uuid) -> Result<bool, sqlx::Error>;

    /// Append an additional image and approve; only valid from
    /// `needs_more_images`.
    async fn add_additional_image(&self, job_id: Uuid, image_url: &str)
        -> Result<bool, sqlx::Error>;

    /// Compare-and-set generation admission: wins the row only if the job is
    /// approved (or user-confirmed) and not already processing or completed.
    async fn try_begin_generation(&self, job_id: Uuid) -> Result<bool, sqlx::Error>;

    async fn mark_credits_consumed(&self, job_id: Uuid, cost: i64) -> Result<(), sqlx::Error>;

    /// Atomically claim the job's unrefunded deduction: clears
    /// `credits_consumed` and returns the recorded cost, but only for the one
    /// caller that observes the flag set. Every refund is gated on winning
    /// this claim, so concurrent refund-capable paths (generation failure,
    /// cancel, post-completion reject) settle a deduction at most once.
    async fn claim_refund(&self, job_id: Uuid) -> Result<Option<i64>, sqlx::Error>;

    /// Record a successful generation; only valid while the job is still
    /// `processing`. Returns false when a concurrent cancel got there first,
    /// in which case the job stays failed and the result is discarded.
    async fn complete_generation(
        &self,
        job_id: Uuid,
        model_url: &str,
        preview_url: Option<String>,
        quality_report: serde_json::Value,
    ) -> Result<bool, sqlx::Error>;

    /// Terminal failure: both status fields become failed, the credits flag
    /// is cleared and the cause is recorded. Refuses to overwrite a job that
    /// already reached a terminal state, so a late provider outcome cannot
    /// clobber an earlier cancellation. The caller settles any outstanding
    /// deduction through `claim_refund` first.
    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> Result<(), sqlx::Error>;

    /// User rejected a finished model: back to `rejected` so a new image can
    /// be submitted. Only valid from `completed`.
    async fn reject_completed(&self, job_id: Uuid, reason: &str) -> Result<bool, sqlx::Error>;

    /// Jobs stuck in `processing` whose `updated_at` is older than the
    /// threshold, flagged for cancellation.
    async fn find_stale(&self, older_than: Duration) -> Result<Vec<FigurineJob>, sqlx::Error>;
}

/// Postgres-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, user_id, original_image_url, additional_images, style, model_type, \
     validation_status, status, quality_report, detected_object, rejection_reason, \
     error_message, user_confirmed, credits_consumed, credits_cost, model_url, \
     preview_url, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<FigurineJob, sqlx::Error> {
    let style: String = row.try_get("style")?;
    let validation_status: String = row.try_get("validation_status")?;
    let status: String = row.try_get("status")?;
    let model_type: Option<String> = row.try_get("model_type")?;

    Ok(FigurineJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        original_image_url: row.try_get("original_image_url")?,
        additional_images: row.try_get("additional_images")?,
        style: FigurineStyle::from_str(&style).unwrap_or(FigurineStyle::Realistic),
        model_type: model_type.and_then(|m| ModelType::from_str(&m).ok()),
        validation_status: ValidationStatus::from_str(&validation_status)
            .unwrap_or(ValidationStatus::Pending),
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Pending),
        quality_report: row.try_get("quality_report")?,
        detected_object: row.try_get("detected_object")?,
        rejection_reason: row.try_get("rejection_reason")?,
        error_message: row.try_get("error_message")?,
        user_confirmed: row.try_get("user_confirmed")?,
        credits_consumed: row.try_get("credits_consumed")?,
        credits_cost: row.try_get("credits_cost")?,
        model_url: row.try_get("model_url")?,
        preview_url: row.try_get("preview_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new: NewJob) -> Result<FigurineJob, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO figurine_jobs (user_id, original_image_url, style)
            VALUES ($1, $2, $3)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&new.user_id)
            .bind(&new.original_image_url)
            .bind(new.style.to_string())
            .fetch_one(&self.pool)
            .await?;

        job_from_row(&row)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<FigurineJob>, sqlx::Error> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM figurine_jobs WHERE id = $1");
        let row = sqlx::query(&sql).bind(job_id).fetch_optional(&self.pool).await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn set_validation_status(
        &self,
        job_id: Uuid,
        status: ValidationStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET validation_status = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status.to_string())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_analysis(
        &self,
        job_id: Uuid,
        analysis: &AnalysisResult,
        outcome: ValidationStatus,
    ) -> Result<(), sqlx::Error> {
        let model_type = analysis.classification.model_type().map(|m| m.to_string());
        let report = serde_json::to_value(analysis).unwrap_or(serde_json::Value::Null);

        sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET model_type = $1,
                validation_status = $2,
                detected_object = $3,
                quality_report = $4,
                rejection_reason = $5,
                credits_consumed = FALSE,
                updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(model_type)
        .bind(outcome.to_string())
        .bind(&analysis.detected_object)
        .bind(report)
        .bind(&analysis.rejection_reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn confirm(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET user_confirmed = TRUE,
                validation_status = 'approved',
                updated_at = NOW()
            WHERE id = $1 AND validation_status = 'awaiting_confirmation'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_additional_image(
        &self,
        job_id: Uuid,
        image_url: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET additional_images = array_append(additional_images, $1),
                validation_status = 'approved',
                updated_at = NOW()
            WHERE id = $2 AND validation_status = 'needs_more_images'
            "#,
        )
        .bind(image_url)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_begin_generation(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        // Single conditional update: two concurrent triggers race here and
        // exactly one wins the row.
        let result = sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET status = 'processing',
                validation_status = 'processing',
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('processing', 'completed')
              AND (validation_status = 'approved' OR user_confirmed = TRUE)
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_credits_consumed(&self, job_id: Uuid, cost: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET credits_consumed = TRUE, credits_cost = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(cost)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_refund(&self, job_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
        // Flag clear and cost read are one statement; only one concurrent
        // caller gets a row back.
        let row = sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET credits_consumed = FALSE, updated_at = NOW()
            WHERE id = $1 AND credits_consumed = TRUE
            RETURNING credits_cost
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get("credits_cost")).transpose()
    }

    async fn complete_generation(
        &self,
        job_id: Uuid,
        model_url: &str,
        preview_url: Option<String>,
        quality_report: serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET status = 'completed',
                validation_status = 'completed',
                model_url = $1,
                preview_url = $2,
                quality_report = $3,
                updated_at = NOW()
            WHERE id = $4 AND status = 'processing'
            "#,
        )
        .bind(model_url)
        .bind(preview_url)
        .bind(quality_report)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET status = 'failed',
                validation_status = 'failed',
                error_message = $1,
                credits_consumed = FALSE,
                updated_at = NOW()
            WHERE id = $2 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(error_message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reject_completed(&self, job_id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE figurine_jobs
            SET status = 'failed',
                validation_status = 'rejected',
                rejection_reason = $1,
                user_confirmed = FALSE,
                updated_at = NOW()
            WHERE id = $2 AND status = 'completed'
            "#,
        )
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_stale(&self, older_than: Duration) -> Result<Vec<FigurineJob>, sqlx::Error> {
        let cutoff = chrono::Utc::now() - older_than;
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM figurine_jobs
            WHERE status = 'processing' AND updated_at < $1
            ORDER BY updated_at ASC
            "#
        );
        let rows = sqlx::query(&sql).bind(cutoff).fetch_all(&self.pool).await?;

        rows.iter().map(job_from_row).collect()
    }
}
