use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Identifier of an isolated clinic tenant. Every cache key and every
/// change-feed channel embeds this value; nothing crosses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the authenticated caller (user id from the verifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request context, attached to request extensions by the
/// authentication middleware and read-only downstream. Never shared
/// across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant: TenantId,
    pub caller: CallerId,
    pub started_at: Instant,
    /// True for read verbs on non-bypass paths; decided once at the
    /// authentication stage.
    pub cacheable: bool,
}

impl RequestContext {
    pub fn new(tenant: TenantId, caller: CallerId, cacheable: bool) -> Self {
        Self {
            tenant,
            caller,
            started_at: Instant::now(),
            cacheable,
        }
    }

    /// Milliseconds elapsed since the request started.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
