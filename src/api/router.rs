//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(ctx: ApiContext) -> Router {
    let max_upload_bytes = ctx.core.config.max_upload_bytes;

    // .with_state() converts Router<ApiContext> → Router<()> so the
    // from_fn middleware (state = ()) can be layered on top.
    let protected = Router::new()
        .route("/predict", post(endpoints::predict::predict))
        .route("/scans", get(endpoints::scans::list))
        .route(
            "/scans/:id",
            get(endpoints::scans::detail)
                .put(endpoints::scans::update)
                .delete(endpoints::scans::remove),
        )
        .route(
            "/patients/:patient_id/scans",
            get(endpoints::scans::list_by_patient).post(endpoints::scans::create),
        )
        .route("/retrain", post(endpoints::retrain::trigger))
        .route("/retrain/status", get(endpoints::retrain::status))
        .route("/retrain/runs", get(endpoints::retrain::runs))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::Extension(ctx.clone()));

    let public = Router::new()
        .route("/health", get(endpoints::health::check))
        .with_state(ctx);

    Router::new()
        .nest("/api", protected.merge(public))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
