// Route table for the gateway

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, ws, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
        .route("/v1/jobs/:job_id", get(handlers::get_job_result))
        .route("/v1/testcases/normalize", post(handlers::normalize_test_cases))
}
