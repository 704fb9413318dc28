// HTTP route handlers for the Elite gateway

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use elite_common::normalize::normalize;
use elite_common::types::{ErrorResponse, SystemError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub raw: String,
}

fn error_json(status: StatusCode, job_id: Option<String>, error: SystemError) -> Response {
    (status, Json(ErrorResponse { job_id, error })).into_response()
}

/// GET /health - Liveness plus broker connectivity
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let broker = if state.broker_connected().await {
        "connected"
    } else {
        "disconnected"
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "broker": broker,
            "timestamp": Utc::now(),
        })),
    )
}

/// GET /metrics - Prometheus text format
pub async fn export_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

/// GET /v1/jobs/{job_id} - Cached result of a finished job
pub async fn get_job_result(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Response {
    let manager = match state.broker().await {
        Ok(manager) => manager,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Broker unavailable");
            return error_json(StatusCode::SERVICE_UNAVAILABLE, Some(job_id), e.to_system_error());
        }
    };

    match manager.backend().cached_result(&job_id).await {
        Ok(Some(payload)) => {
            info!(job_id = %job_id, "Job result retrieved");
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], payload).into_response()
        }
        Ok(None) => {
            info!(job_id = %job_id, "No cached result");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "job_id": job_id,
                    "status": "pending",
                    "message": "Job is still executing, or its result has expired"
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to fetch job result");
            error_json(StatusCode::SERVICE_UNAVAILABLE, Some(job_id), e.to_system_error())
        }
    }
}

/// POST /v1/testcases/normalize - Turn raw test-case text into canonical cases
pub async fn normalize_test_cases(Json(request): Json<NormalizeRequest>) -> Response {
    match normalize(&request.raw) {
        Ok(normalized) => {
            info!(
                cases = normalized.cases.len(),
                skipped = normalized.diagnostics.len(),
                "Test cases normalized"
            );
            (StatusCode::OK, Json(normalized)).into_response()
        }
        Err(e) => {
            let error = e.to_system_error();
            metrics::record_rejected(error.kind);
            error_json(StatusCode::UNPROCESSABLE_ENTITY, None, error)
        }
    }
}
