use std::time::Duration;

use uuid::Uuid;

use crate::db::credits::CreditLedger;
use crate::db::jobs::JobStore;
use crate::models::analysis::{AnalysisResult, Classification};
use crate::models::job::{FigurineJob, JobStatus, NewJob, ValidationStatus};
use crate::services::analysis::{AnalysisError, AnalysisGateway};
use crate::services::generation::{GenerationError, GenerationGateway};

/// Knobs for the generation attempt: fixed credit cost and the bounded
/// provider poll cadence.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub credits_cost: i64,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            credits_cost: 5,
            poll_interval: Duration::from_secs(5),
            poll_max_attempts: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Job not found")]
    JobNotFound(Uuid),

    #[error("Job must be in state '{expected}' for this operation")]
    InvalidState { job_id: Uuid, expected: &'static str },

    #[error("Job must be approved before generation")]
    NotApproved(Uuid),

    #[error("Job is already being processed")]
    AlreadyProcessing(Uuid),

    #[error("Job has already finished")]
    AlreadyFinished(Uuid),

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Generation(GenerationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a successful generation run.
#[derive(Debug, Clone)]
pub struct GenerationSuccess {
    pub job_id: Uuid,
    pub model_url: String,
    pub preview_url: Option<String>,
}

/// Which validation state an analysis result sends the job to.
///
/// The needs-more-images check deliberately precedes the
/// fallback-confirmation check, so an ambiguous object that also needs
/// another angle asks for the image first. Confirmation or an extra image
/// later forces `approved` directly without a second analysis call.
pub fn validation_outcome(analysis: &AnalysisResult, user_confirmed: bool) -> ValidationStatus {
    if analysis.classification == Classification::RejectImage {
        ValidationStatus::Rejected
    } else if analysis.needs_additional_images {
        ValidationStatus::NeedsMoreImages
    } else if analysis.classification == Classification::FallbackModel && !user_confirmed {
        ValidationStatus::AwaitingConfirmation
    } else if analysis.can_proceed {
        ValidationStatus::Approved
    } else {
        ValidationStatus::Pending
    }
}

/// The job lifecycle state machine. Owns no state of its own: every
/// transition is a conditional update in the store, and the credit ledger is
/// only touched by the two short atomic operations around a generation
/// attempt (deduct before polling, refund after failure). Collaborators are
/// injected once at construction.
pub struct JobLifecycle<S, L, A, G> {
    store: S,
    ledger: L,
    analysis: A,
    generation: G,
    settings: GenerationSettings,
}

impl<S, L, A, G> JobLifecycle<S, L, A, G>
where
    S: JobStore,
    L: CreditLedger,
    A: AnalysisGateway,
    G: GenerationGateway,
{
    pub fn new(store: S, ledger: L, analysis: A, generation: G, settings: GenerationSettings) -> Self {
        Self { store, ledger, analysis, generation, settings }
    }

    /// Create a new job for an uploaded image. Both status fields start at
    /// `pending`.
    pub async fn create(&self, new: NewJob) -> Result<FigurineJob, LifecycleError> {
        let job = self.store.create_job(new).await?;
        metrics::counter!("figurine_jobs_created").increment(1);

        tracing::info!(job_id = %job.id, style = %job.style, "figurine job created");
        Ok(job)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<FigurineJob, LifecycleError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(LifecycleError::JobNotFound(job_id))
    }

    /// Run image analysis and apply the transition policy.
    ///
    /// Upstream rate-limit and quota errors surface to the caller untouched;
    /// the job stays in `analyzing` and no credits move. A malformed
    /// classifier answer is handled inside the gateway (fail closed) and
    /// lands here as a normal rejection.
    pub async fn analyze(
        &self,
        job_id: Uuid,
        image_url: Option<&str>,
    ) -> Result<(AnalysisResult, ValidationStatus), LifecycleError> {
        let job = self.get(job_id).await?;
        let url = image_url.unwrap_or(&job.original_image_url);

        self.store
            .set_validation_status(job_id, ValidationStatus::Analyzing)
            .await?;

        tracing::info!(job_id = %job_id, "starting image analysis");
        let analysis = self.analysis.analyze(url).await?;

        let outcome = validation_outcome(&analysis, job.user_confirmed);
        self.store.apply_analysis(job_id, &analysis, outcome).await?;

        tracing::info!(
            job_id = %job_id,
            classification = ?analysis.classification,
            confidence = analysis.confidence,
            outcome = %outcome,
            "image analysis complete"
        );

        Ok((analysis, outcome))
    }

    /// Explicit user confirmation for an ambiguous (FALLBACK_MODEL)
    /// classification. Forces `approved` without re-running analysis.
    pub async fn confirm(&self, job_id: Uuid) -> Result<ValidationStatus, LifecycleError> {
        if self.store.confirm(job_id).await? {
            tracing::info!(job_id = %job_id, "user confirmed fallback model");
            return Ok(ValidationStatus::Approved);
        }

        // Figure out why the conditional update missed.
        self.get(job_id).await?;
        Err(LifecycleError::InvalidState { job_id, expected: "awaiting_confirmation" })
    }

    /// Attach the requested additional image. Forces `approved` without
    /// re-running analysis.
    pub async fn add_image(
        &self,
        job_id: Uuid,
        image_url: &str,
    ) -> Result<ValidationStatus, LifecycleError> {
        if self.store.add_additional_image(job_id, image_url).await? {
            tracing::info!(job_id = %job_id, "additional image attached");
            return Ok(ValidationStatus::Approved);
        }

        self.get(job_id).await?;
        Err(LifecycleError::InvalidState { job_id, expected: "needs_more_images" })
    }

    /// Execute a generation attempt end to end: win the admission
    /// compare-and-set, deduct credits, submit and poll the provider, then
    /// finalize. Any failure after the deduction refunds exactly once before
    /// the job is marked failed.
    pub async fn generate(&self, job_id: Uuid) -> Result<GenerationSuccess, LifecycleError> {
        let job = self.get(job_id).await?;

        if !self.store.try_begin_generation(job_id).await? {
            let job = self.get(job_id).await?;
            return Err(match job.status {
                JobStatus::Processing => LifecycleError::AlreadyProcessing(job_id),
                JobStatus::Completed => LifecycleError::AlreadyFinished(job_id),
                _ => LifecycleError::NotApproved(job_id),
            });
        }

        let cost = self.settings.credits_cost;

        if !self.ledger.deduct(&job.user_id, cost).await? {
            tracing::warn!(job_id = %job_id, user_id = %job.user_id, "insufficient credits");
            self.store.fail_job(job_id, "Insufficient credits").await?;
            metrics::counter!("figurine_generations_failed").increment(1);
            return Err(LifecycleError::InsufficientCredits);
        }

        if let Err(e) = self.store.mark_credits_consumed(job_id, cost).await {
            // The deduction landed but the flag did not; give the credits
            // back before surfacing the persistence failure.
            self.ledger.refund(&job.user_id, cost).await?;
            return Err(e.into());
        }

        let start = std::time::Instant::now();
        match self.run_provider_task(&job).await {
            Ok((task_id, result)) => {
                let quality_report = serde_json::json!({
                    "provider_task_id": task_id,
                    "model_url": result.model_url,
                    "preview_url": result.preview_url,
                    "provider": result.provider_metadata,
                });
                let completed = self
                    .store
                    .complete_generation(
                        job_id,
                        &result.model_url,
                        result.preview_url.clone(),
                        quality_report,
                    )
                    .await?;

                if !completed {
                    // A concurrent cancel took the job while the provider was
                    // running; its claim already settled the ledger, so the
                    // result is discarded.
                    tracing::warn!(job_id = %job_id, "generation finished after the job was cancelled");
                    return Err(LifecycleError::AlreadyFinished(job_id));
                }

                metrics::counter!("figurine_generations_completed").increment(1);
                metrics::histogram!("figurine_generation_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::info!(job_id = %job_id, model_url = %result.model_url, "generation completed");

                Ok(GenerationSuccess {
                    job_id,
                    model_url: result.model_url,
                    preview_url: result.preview_url,
                })
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "generation failed, refunding");
                self.refund_and_fail(&job, &e.to_string()).await?;
                metrics::counter!("figurine_generations_failed").increment(1);
                Err(LifecycleError::Generation(e))
            }
        }
    }

    /// Force a stuck or unwanted pending/processing job into `failed`,
    /// refunding any consumed credits. Part of the core contract so the
    /// ledger invariant stays total even for operator-initiated cleanup.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), LifecycleError> {
        let job = self.get(job_id).await?;

        match job.status {
            JobStatus::Completed | JobStatus::Failed => {
                return Err(LifecycleError::AlreadyFinished(job_id));
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }

        // The claim races against an in-flight generation attempt's own
        // refund; whichever wins it issues the single refund. The cost comes
        // from the claim rather than the earlier read, which may predate the
        // deduction.
        let claimed = self.store.claim_refund(job_id).await?;
        if let Some(cost) = claimed {
            self.ledger.refund(&job.user_id, cost).await?;
            metrics::counter!("figurine_credits_refunded").increment(cost as u64);
        }
        self.store.fail_job(job_id, "Cancelled by user").await?;

        tracing::info!(job_id = %job_id, refunded = claimed.is_some(), "job cancelled");
        Ok(())
    }

    /// The user reviewed a finished model and did not accept it. Refunds the
    /// attempt's cost and puts the job in `rejected`, from which a new image
    /// can be submitted.
    pub async fn reject_model(&self, job_id: Uuid) -> Result<(), LifecycleError> {
        let job = self.get(job_id).await?;

        if !self
            .store
            .reject_completed(job_id, "Model rejected by user")
            .await?
        {
            return Err(LifecycleError::InvalidState { job_id, expected: "completed" });
        }

        if let Some(cost) = self.store.claim_refund(job_id).await? {
            self.ledger.refund(&job.user_id, cost).await?;
            metrics::counter!("figurine_credits_refunded").increment(cost as u64);
        }

        tracing::info!(job_id = %job_id, "model rejected by user, credits refunded");
        Ok(())
    }

    /// Cancel every job stuck in `processing` past the staleness threshold.
    /// Returns how many were cancelled. Used by the sweeper binary.
    pub async fn sweep_stale(&self, older_than: chrono::Duration) -> Result<usize, LifecycleError> {
        let stale = self.store.find_stale(older_than).await?;
        let mut cancelled = 0;

        for job in stale {
            match self.cancel(job.id).await {
                Ok(()) => cancelled += 1,
                // Raced with normal completion; nothing to do.
                Err(LifecycleError::AlreadyFinished(_)) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "failed to cancel stale job");
                }
            }
        }

        Ok(cancelled)
    }

    async fn run_provider_task(
        &self,
        job: &FigurineJob,
    ) -> Result<(String, crate::services::generation::TaskResult), GenerationError> {
        let handle = self
            .generation
            .submit(&job.original_image_url, job.style, job.model_type)
            .await?;

        let result = self
            .generation
            .poll_until_done(
                &handle,
                self.settings.poll_interval,
                self.settings.poll_max_attempts,
            )
            .await?;

        Ok((handle.task_id, result))
    }

    /// Claim-then-refund-then-fail finalizer. The claim loses when a
    /// concurrent cancel already settled this attempt's deduction, in which
    /// case no second refund is issued and `fail_job` leaves the earlier
    /// terminal state alone.
    async fn refund_and_fail(
        &self,
        job: &FigurineJob,
        error_message: &str,
    ) -> Result<(), LifecycleError> {
        if let Some(cost) = self.store.claim_refund(job.id).await? {
            self.ledger.refund(&job.user_id, cost).await?;
            metrics::counter!("figurine_credits_refunded").increment(cost as u64);
        }
        self.store.fail_job(job.id, error_message).await?;
        Ok(())
    }
}
