//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::Condition;
use crate::pipeline::training::JobPhase;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model_version: u64,
    pub model_labels: Vec<Condition>,
    pub confidence_threshold: f32,
    pub retrain: JobPhase,
    pub uptime_secs: i64,
}

/// `GET /api/health`: unauthenticated liveness and model check.
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let model = ctx
        .core
        .classifier()
        .current()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        model_version: model.version(),
        model_labels: model.mapping().labels().to_vec(),
        confidence_threshold: ctx.core.inference().gate().threshold(),
        retrain: ctx.core.retrain_job().status().phase,
        uptime_secs: (chrono::Utc::now() - ctx.core.started_at()).num_seconds(),
    }))
}
