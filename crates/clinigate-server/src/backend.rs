//! Tenant data store queried on cache misses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};

use clinigate_core::{TenantId, TrackedResource};

use crate::config::BackendConfig;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{resource} not found")]
    NotFound { resource: String },
    /// Sanitized message; the raw failure is logged at the call site
    /// that produced it and never reaches clients.
    #[error("{message}")]
    Upstream { message: String },
}

#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Fetches the tenant's rows for a tracked resource. Singleton
    /// resources return a single object and report `NotFound` when the
    /// tenant has no row; list resources return an array, possibly
    /// empty.
    async fn fetch(&self, resource: &TrackedResource, tenant: &TenantId)
    -> Result<Value, BackendError>;
}

/// Backend speaking the platform's PostgREST dialect. Queries run with
/// the service key and are filtered to `clinic_id = eq.{tenant}`.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }
}

#[async_trait]
impl DataBackend for RestBackend {
    async fn fetch(
        &self,
        resource: &TrackedResource,
        tenant: &TenantId,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/rest/v1/{}", self.base_url, resource.table);
        let tenant_filter = format!("eq.{tenant}");
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(&[("select", "*"), ("clinic_id", tenant_filter.as_str())])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(table = resource.table, error = %e, "backend request failed");
                BackendError::Upstream {
                    message: "Database request failed".to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                table = resource.table,
                status = status.as_u16(),
                body = %body,
                "backend returned an error"
            );
            return Err(BackendError::Upstream {
                message: "Database error".to_string(),
            });
        }

        let rows: Value = response.json().await.map_err(|e| {
            tracing::error!(table = resource.table, error = %e, "unreadable backend response");
            BackendError::Upstream {
                message: "Database error".to_string(),
            }
        })?;

        match rows {
            Value::Array(rows) if resource.singleton => match rows.into_iter().next() {
                Some(row) => Ok(row),
                None => Err(BackendError::NotFound {
                    resource: resource.display_name.to_string(),
                }),
            },
            Value::Array(rows) => Ok(Value::Array(rows)),
            other => {
                tracing::error!(table = resource.table, body = %other, "unexpected backend payload shape");
                Err(BackendError::Upstream {
                    message: "Database error".to_string(),
                })
            }
        }
    }
}

/// In-memory backend for tests. Rows are keyed by table and tenant.
#[derive(Default)]
pub struct MemoryBackend {
    rows: DashMap<(String, String), Value>,
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, table: &str, tenant: &TenantId, value: Value) {
        self.rows
            .insert((table.to_string(), tenant.as_str().to_string()), value);
    }

    pub fn remove(&self, table: &str, tenant: &TenantId) {
        self.rows
            .remove(&(table.to_string(), tenant.as_str().to_string()));
    }

    /// While set, every fetch fails as an upstream error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn fetch(
        &self,
        resource: &TrackedResource,
        tenant: &TenantId,
    ) -> Result<Value, BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Upstream {
                message: "Database error".to_string(),
            });
        }
        let key = (resource.table.to_string(), tenant.as_str().to_string());
        match self.rows.get(&key) {
            Some(value) => Ok(value.clone()),
            None if resource.singleton => Err(BackendError::NotFound {
                resource: resource.display_name.to_string(),
            }),
            None => Ok(json!([])),
        }
    }
}
