//! Write path: validate locally, forward once, audit every outcome.
//!
//! Mutating requests are never applied locally. A single forwarding
//! attempt is made with a bounded timeout; retries are left to the
//! caller so a write is delivered at most once from here.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use clinigate_core::{ApiResponse, ForwardingCause, GatewayError, RequestContext};

use crate::audit::{AuditOutcome, AuditRecord};
use crate::error::error_response;
use crate::middleware::BearerToken;
use crate::server::AppState;

const MAX_WRITE_BODY: usize = 1024 * 1024;

/// Validated payload for an analysis run request.
#[derive(Debug)]
struct AnalysisRequest {
    id: String,
    options: Option<Value>,
}

fn validate(bytes: &[u8]) -> Result<AnalysisRequest, GatewayError> {
    let payload: Value = serde_json::from_slice(bytes)
        .map_err(|_| GatewayError::validation("Request body must be valid JSON"))?;
    let body = payload
        .as_object()
        .ok_or_else(|| GatewayError::validation("Request body must be a JSON object"))?;

    let id = match body.get("id") {
        None => return Err(GatewayError::validation_field("id", "id is required")),
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(_) => {
            return Err(GatewayError::validation_field(
                "id",
                "id must be a non-empty string",
            ));
        }
    };

    let options = match body.get("options") {
        None | Some(Value::Null) => None,
        Some(options @ Value::Object(_)) => Some(options.clone()),
        Some(_) => {
            return Err(GatewayError::validation_field(
                "options",
                "options must be an object",
            ));
        }
    };

    Ok(AnalysisRequest { id, options })
}

/// POST /analysis/start. Bypasses the read cache entirely.
pub async fn start_analysis(State(state): State<AppState>, req: Request) -> Response {
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        // Authentication attaches the context to every non-public request.
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let token = req
        .extensions()
        .get::<BearerToken>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let bytes = match axum::body::to_bytes(req.into_body(), MAX_WRITE_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let err = GatewayError::validation("Request body too large");
            audit(&state, &ctx, None, AuditOutcome::Rejected).await;
            return error_response(&ctx, err);
        }
    };

    let request = match validate(&bytes) {
        Ok(request) => request,
        Err(err) => {
            audit(&state, &ctx, None, AuditOutcome::Rejected).await;
            return error_response(&ctx, err);
        }
    };

    let url = format!(
        "{}/{}",
        state.config.forward.base_url.trim_end_matches('/'),
        state.config.forward.operation
    );
    let mut body = json!({
        "id": request.id,
        "clinic_id": ctx.tenant.as_str(),
    });
    if let Some(options) = request.options {
        body["options"] = options;
    }

    tracing::info!(
        tenant = %ctx.tenant,
        entity = %request.id,
        "forwarding write"
    );

    let result = state
        .http
        .post(&url)
        .bearer_auth(&token)
        .timeout(state.config.forward.timeout())
        .json(&body)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            audit(&state, &ctx, Some(request.id), AuditOutcome::TransportError).await;
            let err = if e.is_timeout() {
                GatewayError::forwarding("Write forwarding timed out", ForwardingCause::Timeout)
            } else if e.is_connect() {
                GatewayError::forwarding(
                    "Write processing service unreachable",
                    ForwardingCause::Connect,
                )
            } else {
                tracing::error!(error = %e, "write forwarding failed");
                GatewayError::forwarding("Write forwarding failed", ForwardingCause::Other)
            };
            return error_response(&ctx, err);
        }
    };

    let status = response.status();
    let upstream_body: Value = match response.text().await {
        Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Err(_) => Value::Null,
    };

    if status.is_success() {
        audit(&state, &ctx, Some(request.id), AuditOutcome::Forwarded).await;
        return (
            StatusCode::OK,
            Json(ApiResponse::forwarded(upstream_body, ctx.elapsed_ms())),
        )
            .into_response();
    }

    audit(&state, &ctx, Some(request.id), AuditOutcome::UpstreamError).await;
    error_response(
        &ctx,
        GatewayError::upstream_with_details(
            "Write processing failed",
            json!({ "status": status.as_u16(), "body": upstream_body }),
        ),
    )
}

async fn audit(
    state: &AppState,
    ctx: &RequestContext,
    resource_id: Option<String>,
    outcome: AuditOutcome,
) {
    let operation = state.config.forward.operation.clone();
    state
        .audit
        .record(AuditRecord::write(ctx, operation, resource_id, outcome))
        .await;
}
