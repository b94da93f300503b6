use sqlx::PgPool;
use std::sync::Arc;

use crate::db::credits::PgCreditLedger;
use crate::db::jobs::PgJobStore;
use crate::services::analysis::VisionAiClient;
use crate::services::generation::MeshyClient;
use crate::services::lifecycle::JobLifecycle;

/// The lifecycle controller wired to its production collaborators.
pub type Lifecycle = JobLifecycle<PgJobStore, PgCreditLedger, VisionAiClient, MeshyClient>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub lifecycle: Arc<Lifecycle>,
}

impl AppState {
    pub fn new(db: PgPool, lifecycle: Lifecycle) -> Self {
        Self {
            db,
            lifecycle: Arc::new(lifecycle),
        }
    }
}
