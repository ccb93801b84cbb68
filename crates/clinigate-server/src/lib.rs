//! Edge read/write split gateway.
//!
//! Reads are authenticated, served through a tenant-scoped TTL cache,
//! and invalidated reactively by per-tenant change notifications.
//! Writes bypass the cache and are forwarded, after local validation,
//! to a downstream write processor in a single audited attempt.

pub mod audit;
pub mod backend;
pub mod cache_middleware;
pub mod config;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod latency;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod verifier;

pub use config::AppConfig;
pub use server::{AppState, ClinigateServer, build_app};
