//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, resolves it through the
//! configured `AuthGate`, and injects the `Actor` into request extensions
//! for downstream handlers.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

/// Require a valid bearer token.
///
/// Accesses `ApiContext` from request extensions (injected by Extension layer).
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let actor = match ctx.auth.authenticate(token) {
        Some(actor) => actor,
        None => {
            tracing::warn!(path = %req.uri().path(), "Rejected bearer token");
            return Err(ApiError::Unauthorized);
        }
    };

    tracing::debug!(user = %actor.username, role = %actor.role, path = %req.uri().path(), "Authenticated");
    req.extensions_mut().insert(actor);

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));
    Ok(response)
}
