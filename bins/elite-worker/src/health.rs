// Liveness endpoint for the worker process
use crate::worker::{WorkerSnapshot, WorkerStatus};
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs_processed: u64,
    pub workers: Vec<WorkerSnapshot>,
}

/// GET /health
pub async fn health(State(status): State<Arc<WorkerStatus>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        jobs_processed: status.total_processed(),
        workers: status.snapshot(),
    })
}

pub fn router(status: Arc<WorkerStatus>) -> Router {
    Router::new().route("/health", get(health)).with_state(status)
}
