//! `POST /api/predict`: classify an uploaded OCT scan.
//!
//! The image is read from the multipart field `file`. Decoding and the
//! forward pass run on a blocking thread under the configured timeout.

use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::Extension;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{Actor, ApiContext};
use crate::models::ScanPrediction;

const FILE_FIELD: &str = "file";
const DEFAULT_UPLOAD_NAME: &str = "scan.png";

pub async fn predict(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<Actor>,
    mut multipart: Multipart,
) -> Result<Json<ScanPrediction>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("multipart field 'file' is required".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::InvalidImage("empty upload".into()));
    }

    tracing::info!(user = %actor.username, filename = %filename, bytes = bytes.len(), "Prediction requested");

    let service = ctx.core.inference().clone();
    let prediction = run_with_timeout(ctx.core.config.predict_timeout_secs, move || {
        service.infer(&bytes, &filename)
    })
    .await??;

    Ok(Json(prediction))
}

/// Run `work` on the blocking pool, giving up after `secs`.
///
/// On timeout the blocking task is left to finish on its own.
async fn run_with_timeout<T, F>(secs: u64, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::time::timeout(Duration::from_secs(secs), task)
        .await
        .map_err(|_| {
            tracing::warn!(timeout_secs = secs, "Prediction timed out");
            ApiError::InferenceTimeout(secs)
        })?
        .map_err(ApiError::from)
}
