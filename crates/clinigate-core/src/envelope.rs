//! Response envelope shared by every gateway endpoint.
//!
//! Success: `{ success, data, responseTime, cached }`, plus
//! `forwarded: true` on the write path.
//! Error: `{ error, responseTime }` (401 bodies carry only `error`).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Uniform success envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Value,
    #[serde(rename = "responseTime")]
    pub response_time: u64,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<bool>,
}

impl ApiResponse {
    /// Envelope for a read served by a handler or from the cache.
    pub fn ok(data: Value, response_time_ms: u64, cached: bool) -> Self {
        Self {
            success: true,
            data,
            response_time: response_time_ms,
            cached,
            forwarded: None,
        }
    }

    /// Envelope for a successfully forwarded write.
    pub fn forwarded(data: Value, response_time_ms: u64) -> Self {
        Self {
            success: true,
            data,
            response_time: response_time_ms,
            cached: false,
            forwarded: Some(true),
        }
    }
}

/// Error body with elapsed time, used for 4xx/5xx other than auth.
pub fn error_body(message: &str, response_time_ms: u64) -> Value {
    json!({ "error": message, "responseTime": response_time_ms })
}

/// Error body with diagnostics detail attached under `details`.
pub fn error_body_with_details(message: &str, details: Value, response_time_ms: u64) -> Value {
    json!({ "error": message, "details": details, "responseTime": response_time_ms })
}

/// Bare error body for authentication failures.
pub fn auth_error_body(message: &str) -> Value {
    json!({ "error": message })
}
