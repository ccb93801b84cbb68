//! Application state, router assembly, and server lifecycle.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Router, middleware as axum_middleware};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use clinigate_cache::{CacheStore, SweeperHandle, spawn_sweeper};
use clinigate_core::TRACKED_RESOURCES;
use clinigate_realtime::{ChangeFeed, MemoryFeed, RedisFeed, SubscriptionRegistry};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::backend::{DataBackend, RestBackend};
use crate::config::AppConfig;
use crate::latency::LatencyRecorder;
use crate::verifier::{HttpVerifier, TokenVerifier};
use crate::{cache_middleware, forward, handlers, latency, middleware};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: CacheStore,
    pub verifier: Arc<dyn TokenVerifier>,
    pub backend: Arc<dyn DataBackend>,
    pub registry: Arc<SubscriptionRegistry>,
    pub latency: LatencyRecorder,
    pub audit: Arc<dyn AuditSink>,
    /// Client used for write forwarding.
    pub http: reqwest::Client,
}

impl AppState {
    /// Assembles state from explicit components. Tests use this with
    /// in-memory implementations.
    pub fn new(
        config: AppConfig,
        verifier: Arc<dyn TokenVerifier>,
        backend: Arc<dyn DataBackend>,
        feed: Arc<dyn ChangeFeed>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        let cache = CacheStore::new(config.cache.default_ttl());
        let registry = Arc::new(SubscriptionRegistry::new(feed, cache.clone()));
        let (latency, _worker) = LatencyRecorder::spawn();
        let http = reqwest::Client::builder()
            .timeout(config.forward.timeout())
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            cache,
            verifier,
            backend,
            registry,
            latency,
            audit,
            http,
        })
    }

    /// Assembles production state: HTTP verifier, REST backend, Redis
    /// change feed, log-based audit sink.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let verifier: Arc<dyn TokenVerifier> = Arc::new(HttpVerifier::new(&config.auth)?);
        let backend: Arc<dyn DataBackend> = Arc::new(RestBackend::new(&config.backend)?);
        let feed: Arc<dyn ChangeFeed> = if config.feed.enabled {
            Arc::new(RedisFeed::new(config.feed.redis_url.clone()))
        } else {
            tracing::warn!("change feed disabled; cache entries only age out via TTL");
            MemoryFeed::new()
        };
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        Self::new(config, verifier, backend, feed, audit)
    }
}

/// Builds the gateway router. Layer order matters: authentication runs
/// before the cache so every cache key carries a verified tenant, and
/// the panic guard wraps everything below the trace layer.
pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new().route("/healthz", get(handlers::healthz));

    for resource in TRACKED_RESOURCES {
        router = router.route(resource.path, get(handlers::read_tracked));
    }

    router
        .route("/analysis/start", post(forward::start_analysis))
        .fallback(handlers::not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            cache_middleware::read_cache,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            latency::track,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::authentication,
        ))
        .layer(axum_middleware::from_fn(middleware::panic_guard))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum_middleware::from_fn(middleware::request_id))
        .with_state(state)
}

pub struct ClinigateServer {
    state: AppState,
    _sweeper: SweeperHandle,
}

impl ClinigateServer {
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let state = AppState::from_config(config)?;
        let sweeper = spawn_sweeper(state.cache.clone(), state.config.cache.sweep_interval());
        Ok(Self {
            state,
            _sweeper: sweeper,
        })
    }

    /// Binds and serves until ctrl-c, then tears down subscriptions.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.state.config.socket_addr()?;
        let registry = self.state.registry.clone();
        let app = build_app(self.state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        registry.shutdown();
        tracing::info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    } else {
        tracing::info!("shutdown signal received");
    }
}
