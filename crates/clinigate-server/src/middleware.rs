//! Request-scoped middleware: authentication, request ids, and the
//! panic guard.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use clinigate_core::{AuthError, RequestContext, auth_error_body, error_body};

use crate::server::AppState;

/// Raw bearer token of the authenticated caller, forwarded as-is on
/// the write path.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Paths served without authentication.
const PUBLIC_PATHS: &[&str] = &["/healthz"];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

fn is_read_verb(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

fn auth_failure(err: AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(auth_error_body(&err.to_string())),
    )
        .into_response()
}

/// Verifies the bearer token, attaches the request context, and kicks
/// off the tenant's change-feed subscription. Unauthenticated requests
/// never reach a handler.
pub async fn authentication(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    let Some(token) = token.map(str::to_string) else {
        return auth_failure(AuthError::MissingHeader);
    };

    let verified = match state.verifier.verify(&token).await {
        Ok(verified) => verified,
        Err(err) => return auth_failure(err),
    };

    let cacheable =
        is_read_verb(req.method()) && !state.config.cache.is_bypass_path(req.uri().path());
    let ctx = RequestContext::new(verified.tenant.clone(), verified.caller, cacheable);

    // Idempotent and detached: the request never waits on the feed.
    let registry = state.registry.clone();
    tokio::spawn(async move {
        registry.ensure_subscribed(&verified.tenant).await;
    });

    req.extensions_mut().insert(ctx);
    req.extensions_mut().insert(BearerToken(token));
    next.run(req).await
}

/// Attaches a request id, honoring one supplied by the client.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&id) {
        req.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(req).await;
        response.headers_mut().insert("x-request-id", value);
        response
    } else {
        next.run(req).await
    }
}

/// Converts a panicking handler into the structured 500 instead of a
/// torn connection. Runs outside the authentication layer, so the
/// elapsed time is measured here rather than taken from the request
/// context.
pub async fn panic_guard(req: Request, next: Next) -> Response {
    let started = Instant::now();
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| panic.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            tracing::error!(panic = %detail, "handler panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body(
                    "Internal server error",
                    started.elapsed().as_millis() as u64,
                )),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_cover_health_only() {
        assert!(is_public("/healthz"));
        assert!(!is_public("/patients"));
        assert!(!is_public("/"));
    }

    #[test]
    fn read_verbs() {
        assert!(is_read_verb(&Method::GET));
        assert!(is_read_verb(&Method::HEAD));
        assert!(!is_read_verb(&Method::POST));
        assert!(!is_read_verb(&Method::DELETE));
    }

    #[tokio::test]
    async fn panics_become_structured_500_with_elapsed_time() {
        let app = axum::Router::new()
            .route(
                "/boom",
                axum::routing::get(|| async {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    if true {
                        panic!("kaboom");
                    }
                    ""
                }),
            )
            .layer(axum::middleware::from_fn(panic_guard));

        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let resp = reqwest::get(format!("http://{addr}/boom")).await.unwrap();
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert!(body["responseTime"].as_u64().unwrap() >= 20);
    }
}
