//! Audit trail for mutating requests.
//!
//! Every write attempt produces exactly one record, whatever its
//! outcome. The default sink emits structured log events under the
//! `clinigate::audit` target so the trail can be shipped with the rest
//! of the logs.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use clinigate_core::RequestContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Accepted locally and acknowledged by the write processor.
    Forwarded,
    /// Rejected by local validation before forwarding.
    Rejected,
    /// Forwarded, but the write processor reported a failure.
    UpstreamError,
    /// The write processor could not be reached or timed out.
    TransportError,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub tenant_id: String,
    pub caller_id: String,
    pub operation: String,
    /// Client-supplied identifier of the entity being written, when
    /// validation got far enough to extract one.
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl AuditRecord {
    pub fn write(
        ctx: &RequestContext,
        operation: impl Into<String>,
        resource_id: Option<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            tenant_id: ctx.tenant.as_str().to_string(),
            caller_id: ctx.caller.as_str().to_string(),
            operation: operation.into(),
            resource_id,
            outcome,
            at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Sink that writes records as structured log events.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "clinigate::audit",
            tenant_id = %record.tenant_id,
            caller_id = %record.caller_id,
            operation = %record.operation,
            resource_id = record.resource_id.as_deref().unwrap_or("-"),
            outcome = ?record.outcome,
            "write audited"
        );
    }
}

/// Sink that stores records in memory, for tests.
#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
