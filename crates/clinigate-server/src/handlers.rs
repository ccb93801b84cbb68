//! Read handlers for the tracked resources.
//!
//! Handlers return the raw backend payload; the cache middleware wraps
//! it in the success envelope and owns the `cached` flag. Error paths
//! build their envelope here so nothing caches them.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use clinigate_core::{GatewayError, RequestContext, resource_for_path};

use crate::backend::BackendError;
use crate::error::error_response;
use crate::server::AppState;

/// GET /healthz. The only unauthenticated endpoint.
pub async fn healthz() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "clinigate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Shared handler for every tracked read route. The route table and
/// the resource table are the same data, so dispatch is by path.
pub async fn read_tracked(State(state): State<AppState>, req: Request) -> Response {
    let Some(ctx) = req.extensions().get::<RequestContext>() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let Some(resource) = resource_for_path(req.uri().path()) else {
        return error_response(ctx, GatewayError::not_found("Resource"));
    };

    match state.backend.fetch(resource, &ctx.tenant).await {
        Ok(data) => Json(data).into_response(),
        Err(BackendError::NotFound { resource }) => {
            error_response(ctx, GatewayError::not_found(resource))
        }
        Err(BackendError::Upstream { message }) => {
            error_response(ctx, GatewayError::upstream(message))
        }
    }
}

/// Fallback for unknown routes. Authenticated requests get the timed
/// error envelope; anything else only the message.
pub async fn not_found(req: Request) -> Response {
    match req.extensions().get::<RequestContext>() {
        Some(ctx) => error_response(ctx, GatewayError::not_found("Resource")),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Resource not found" })),
        )
            .into_response(),
    }
}
