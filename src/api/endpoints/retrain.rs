//! Retraining endpoints.
//!
//! - `POST /api/retrain`: doctor-only manual trigger (202 started, 409 busy)
//! - `GET /api/retrain/status`
//! - `GET /api/retrain/runs?limit=N`

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{Actor, ApiContext};
use crate::db::RUN_HISTORY_LIMIT;
use crate::models::{RetrainRun, RetrainTrigger};
use crate::pipeline::training::JobStatus;

#[derive(Serialize)]
pub struct TriggerResponse {
    pub status: &'static str,
    pub trigger: RetrainTrigger,
    pub started_at: DateTime<Utc>,
}

pub async fn trigger(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<Actor>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    if !actor.can_assess() {
        return Err(ApiError::Forbidden("Only doctors may start retraining".into()));
    }

    let permit = ctx
        .core
        .retrain_job()
        .try_begin(RetrainTrigger::Manual)
        .ok_or_else(|| ApiError::Conflict("A retraining run is already in progress".into()))?;

    tracing::info!(user = %actor.username, "Manual retrain started");
    tokio::task::spawn_blocking(move || permit.run());

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            status: "started",
            trigger: RetrainTrigger::Manual,
            started_at: Utc::now(),
        }),
    ))
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub job: JobStatus,
    pub model_version: u64,
}

pub async fn status(State(ctx): State<ApiContext>) -> Result<Json<StatusResponse>, ApiError> {
    let model_version = ctx
        .core
        .classifier()
        .version()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(StatusResponse {
        job: ctx.core.retrain_job().status(),
        model_version,
    }))
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

pub async fn runs(
    State(ctx): State<ApiContext>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RetrainRun>>, ApiError> {
    let limit = query.limit.unwrap_or(RUN_HISTORY_LIMIT).clamp(1, RUN_HISTORY_LIMIT);
    Ok(Json(ctx.core.store().list_runs(limit)?))
}
