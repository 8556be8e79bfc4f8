//! Scan record endpoints.
//!
//! - `GET /api/scans`, `GET /api/scans/:id`
//! - `PUT /api/scans/:id`: partial update; assessment fields need a doctor, and
//!   so does the prediction once the scan has been assessed
//! - `DELETE /api/scans/:id`
//! - `GET|POST /api/patients/:patient_id/scans`

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{Actor, ApiContext};
use crate::models::{Assessor, NewScan, Scan, ScanUpdate};

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("Invalid ID format".into()))
}

pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<Vec<Scan>>, ApiError> {
    Ok(Json(ctx.core.store().list()?))
}

pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Scan>, ApiError> {
    let id = parse_id(&id)?;
    ctx.core
        .store()
        .get(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Scan {id} not found")))
}

pub async fn list_by_patient(
    State(ctx): State<ApiContext>,
    Path(patient_id): Path<String>,
) -> Result<Json<Vec<Scan>>, ApiError> {
    Ok(Json(ctx.core.store().list_by_patient(&patient_id)?))
}

/// `POST /api/patients/:patient_id/scans`: record a scan after `/predict`.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<Actor>,
    Path(patient_id): Path<String>,
    Json(mut new): Json<NewScan>,
) -> Result<(StatusCode, Json<Scan>), ApiError> {
    new.patient_id = patient_id;
    let scan = ctx.core.store().create(new)?;
    tracing::info!(scan_id = %scan.id, user = %actor.username, "Scan created via API");
    Ok((StatusCode::CREATED, Json(scan)))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(update): Json<ScanUpdate>,
) -> Result<Json<Scan>, ApiError> {
    let id = parse_id(&id)?;

    if update.has_assessment() && !actor.can_assess() {
        return Err(ApiError::Forbidden(
            "Only doctors may confirm, correct or annotate a scan".into(),
        ));
    }

    // A doctor rewriting the prediction is reviewing the label too. Anyone
    // else is refused by the store once the scan has been assessed.
    let assessor = (actor.can_assess() && (update.has_assessment() || update.changes_prediction()))
        .then(|| Assessor {
            username: actor.username.clone(),
            at: Utc::now(),
        });

    let scan = ctx.core.store().update(&id, &update, assessor.as_ref())?;
    if let Some(a) = &assessor {
        tracing::info!(
            scan_id = %id,
            assessed_by = %a.username,
            confirmed = ?scan.doctor_confirmed,
            corrected = ?scan.doctor_corrected_diagnosis,
            "Scan assessed"
        );
    }
    Ok(Json(scan))
}

pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<Scan>, ApiError> {
    let id = parse_id(&id)?;
    let removed = ctx.core.store().delete(&id)?;
    tracing::info!(scan_id = %id, user = %actor.username, "Scan removed via API");
    Ok(Json(removed))
}
