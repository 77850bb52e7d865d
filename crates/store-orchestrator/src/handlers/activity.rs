use axum::{extract::State, Json};
use std::sync::Arc;

use crate::activity::ActivityEntry;
use crate::services::StoreOrchestrator;

/// Create and delete history, oldest first
pub async fn activity_handler(
    State(orchestrator): State<Arc<StoreOrchestrator>>,
) -> Json<Vec<ActivityEntry>> {
    Json(orchestrator.activity())
}
