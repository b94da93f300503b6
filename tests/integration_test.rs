use figurine_forge::{
    db::{self, credits::CreditLedger, credits::PgCreditLedger, jobs::JobStore, jobs::PgJobStore},
    models::job::{FigurineStyle, JobStatus, NewJob, ValidationStatus},
};
use uuid::Uuid;

/// Integration test: job store and credit ledger against live Postgres
///
/// This test verifies the complete persistence integration:
/// 1. Database connection and migrations
/// 2. Job creation and retrieval
/// 3. Conditional state transitions (confirm, admission, reject)
/// 4. Credit ledger grant/deduct/refund atomicity
///
/// Note: This requires a running PostgreSQL instance configured via
/// DATABASE_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    // Initialize database
    let db_pool = db::init_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let store = PgJobStore::new(db_pool.clone());
    let ledger = PgCreditLedger::new(db_pool.clone());

    // Unique account per run so reruns do not interfere
    let user_id = format!("it-user-{}", Uuid::new_v4());

    // 1. Test ledger seeding and balance
    ledger.grant(&user_id, 15).await.expect("Failed to grant credits");
    let balance = ledger.balance(&user_id).await.expect("Failed to read balance");
    assert_eq!(balance, 15);

    // 2. Test job creation
    let job = store
        .create_job(NewJob {
            user_id: user_id.clone(),
            original_image_url: "https://uploads.test/integration.jpg".to_string(),
            style: FigurineStyle::Anime,
        })
        .await
        .expect("Failed to create job");

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.validation_status, ValidationStatus::Pending);
    assert_eq!(job.style, FigurineStyle::Anime);
    assert!(!job.credits_consumed);

    // 3. Test job retrieval
    let retrieved = store
        .get_job(job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(retrieved.id, job.id);
    assert_eq!(retrieved.user_id, user_id);

    // 4. Confirm is rejected outside awaiting_confirmation
    let confirmed = store.confirm(job.id).await.expect("Confirm query failed");
    assert!(!confirmed);

    // 5. Admission is rejected before approval
    let admitted = store
        .try_begin_generation(job.id)
        .await
        .expect("Admission query failed");
    assert!(!admitted);

    // 6. Approve and win the admission compare-and-set exactly once
    store
        .set_validation_status(job.id, ValidationStatus::Approved)
        .await
        .expect("Failed to approve");

    let first = store
        .try_begin_generation(job.id)
        .await
        .expect("Admission query failed");
    let second = store
        .try_begin_generation(job.id)
        .await
        .expect("Admission query failed");
    assert!(first);
    assert!(!second);

    let processing = store
        .get_job(job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(processing.status, JobStatus::Processing);
    assert_eq!(processing.validation_status, ValidationStatus::Processing);

    // 7. Conditional deduct: sufficient, then insufficient
    let deducted = ledger.deduct(&user_id, 5).await.expect("Deduct query failed");
    assert!(deducted);
    assert_eq!(ledger.balance(&user_id).await.expect("balance"), 10);

    let overdraw = ledger.deduct(&user_id, 100).await.expect("Deduct query failed");
    assert!(!overdraw);
    assert_eq!(ledger.balance(&user_id).await.expect("balance"), 10);

    store
        .mark_credits_consumed(job.id, 5)
        .await
        .expect("Failed to mark credits consumed");

    // 8. Complete and verify stored URLs
    let completed_won = store
        .complete_generation(
            job.id,
            "https://cdn.test/integration.glb",
            Some("https://cdn.test/integration.png".to_string()),
            serde_json::json!({"provider_task_id": "it-task"}),
        )
        .await
        .expect("Failed to complete generation");
    assert!(completed_won);

    let completed = store
        .get_job(job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(
        completed.model_url.as_deref(),
        Some("https://cdn.test/integration.glb")
    );
    assert!(completed.credits_consumed);
    assert_eq!(completed.credits_cost, 5);

    // 9. Reject the finished model; the refund claim wins once
    let rejected = store
        .reject_completed(job.id, "Model rejected by user")
        .await
        .expect("Reject query failed");
    assert!(rejected);

    let claimed = store.claim_refund(job.id).await.expect("Claim query failed");
    assert_eq!(claimed, Some(5));
    let claimed_again = store.claim_refund(job.id).await.expect("Claim query failed");
    assert!(claimed_again.is_none());

    ledger.refund(&user_id, 5).await.expect("Failed to refund");
    assert_eq!(ledger.balance(&user_id).await.expect("balance"), 15);

    let final_job = store
        .get_job(job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(final_job.status, JobStatus::Failed);
    assert_eq!(final_job.validation_status, ValidationStatus::Rejected);
    assert!(!final_job.credits_consumed);

    // 10. A second reject finds no completed row
    let again = store
        .reject_completed(job.id, "Model rejected by user")
        .await
        .expect("Reject query failed");
    assert!(!again);

    println!("✅ All integration tests passed!");
}
