//! Conversion from the gateway error taxonomy to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use clinigate_core::{
    GatewayError, RequestContext, auth_error_body, error_body, error_body_with_details,
};

/// Builds the error response for a failed request. Authentication
/// failures carry a bare `{error}` body; everything else includes the
/// elapsed time, and upstream detail rides along under `details`.
pub fn error_response(ctx: &RequestContext, err: GatewayError) -> Response {
    if !err.is_client_error() {
        tracing::error!(category = %err.category(), error = %err, "request failed");
    }

    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match &err {
        GatewayError::Auth(_) => auth_error_body(&err.to_string()),
        GatewayError::Validation {
            field: Some(field), ..
        } => error_body_with_details(&err.to_string(), json!({ "field": field }), ctx.elapsed_ms()),
        GatewayError::Upstream {
            details: Some(details),
            ..
        } => error_body_with_details(&err.to_string(), details.clone(), ctx.elapsed_ms()),
        _ => error_body(&err.to_string(), ctx.elapsed_ms()),
    };

    (status, Json(body)).into_response()
}
