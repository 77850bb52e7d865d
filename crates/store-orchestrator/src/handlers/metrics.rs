use axum::{extract::State, Json};
use std::sync::Arc;

use crate::metrics::MetricsSnapshot;
use crate::services::StoreOrchestrator;

pub async fn metrics_handler(
    State(orchestrator): State<Arc<StoreOrchestrator>>,
) -> Json<MetricsSnapshot> {
    Json(orchestrator.metrics())
}
