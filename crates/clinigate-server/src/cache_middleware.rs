//! Read-through cache in front of the tracked read handlers.
//!
//! Cacheable requests look their key up before the handler runs. A hit
//! short-circuits with the cached payload re-wrapped in a fresh
//! envelope; a miss runs the handler and, when it produced a clean JSON
//! payload, stores the raw bytes under the tenant-scoped key. Error
//! responses are never cached.

use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use clinigate_cache::CacheStore;
use clinigate_core::{ApiResponse, RequestContext, error_body};

use crate::server::AppState;

/// Responses above this size pass through uncached.
const MAX_CACHEABLE_BODY: usize = 1024 * 1024;

pub async fn read_cache(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return next.run(req).await;
    };
    if !ctx.cacheable {
        return next.run(req).await;
    }

    let key = CacheStore::resource_key(req.uri().path(), &ctx.tenant);

    if let Some(cached) = state.cache.get(&key) {
        match serde_json::from_slice::<Value>(&cached) {
            Ok(data) => {
                tracing::debug!(key = %key, "cache hit");
                return (
                    StatusCode::OK,
                    Json(ApiResponse::ok(data, ctx.elapsed_ms(), true)),
                )
                    .into_response();
            }
            Err(e) => {
                // Treat an unreadable entry as a miss and drop it.
                tracing::warn!(key = %key, error = %e, "unreadable cache entry dropped");
                state.cache.delete(&key);
            }
        }
    }

    let response = next.run(req).await;
    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CACHEABLE_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to buffer handler response");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("Internal server error", ctx.elapsed_ms())),
            )
                .into_response();
        }
    };

    if parts.status.is_success() {
        let data = match serde_json::from_slice::<Value>(&bytes) {
            Ok(data) => {
                if data.get("error").is_none() {
                    state.cache.set(&key, bytes.to_vec(), None);
                    tracing::debug!(key = %key, bytes = bytes.len(), "cache populated");
                }
                data
            }
            // Successful reads always get the envelope, even when the
            // payload is not JSON; only clean JSON is cached.
            Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        };
        return (
            StatusCode::OK,
            Json(ApiResponse::ok(data, ctx.elapsed_ms(), false)),
        )
            .into_response();
    }

    // Error statuses pass through untouched.
    Response::from_parts(parts, Body::from(bytes))
}
