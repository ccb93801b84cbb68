//! Fire-and-forget request latency recording.
//!
//! Samples are pushed onto a bounded channel and folded into metrics by
//! a background worker. Recording never blocks a request path; when the
//! channel is full the sample is dropped.

use std::sync::OnceLock;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use clinigate_core::RequestContext;

use crate::server::AppState;

pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const REQUESTS_TOTAL: &str = "gateway_requests_total";

const SAMPLE_QUEUE_DEPTH: usize = 1024;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global metrics recorder. Safe to call more than once;
/// later calls keep the first recorder.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder already installed");
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencySample {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct LatencyRecorder {
    tx: mpsc::Sender<LatencySample>,
}

impl LatencyRecorder {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LatencySample>(SAMPLE_QUEUE_DEPTH);
        let worker = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                metrics::histogram!(
                    REQUEST_DURATION_SECONDS,
                    "method" => sample.method.clone(),
                    "path" => sample.path.clone(),
                )
                .record(sample.elapsed.as_secs_f64());
                metrics::counter!(
                    REQUESTS_TOTAL,
                    "method" => sample.method.clone(),
                    "path" => sample.path.clone(),
                    "status" => sample.status.to_string(),
                )
                .increment(1);
                tracing::trace!(
                    method = %sample.method,
                    path = %sample.path,
                    status = sample.status,
                    elapsed_ms = sample.elapsed.as_millis() as u64,
                    "request latency recorded"
                );
            }
        });
        (Self { tx }, worker)
    }

    /// Queues a sample. A full queue drops it rather than waiting.
    pub fn record(&self, sample: LatencySample) {
        let _ = self.tx.try_send(sample);
    }
}

/// Middleware recording latency for successful responses. Failed
/// requests are excluded so error spikes do not skew the latency view.
pub async fn track(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.started_at);

    let response = next.run(req).await;

    let status = response.status();
    if status.is_success() || status.is_redirection() {
        if let Some(started) = started {
            state.latency.record(LatencySample {
                method,
                path,
                status: status.as_u16(),
                elapsed: started.elapsed(),
            });
        }
    }
    response
}
