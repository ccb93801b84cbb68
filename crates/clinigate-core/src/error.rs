use thiserror::Error;

/// Authentication failures. Always terminal, always 401, no anonymous path.
///
/// The display strings are part of the public API contract and are returned
/// verbatim to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing or invalid authorization header")]
    MissingHeader,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Missing clinic_id in user metadata")]
    MissingTenant,
}

/// Why a write forward failed before the upstream could report an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingCause {
    /// The bounded upstream timeout elapsed.
    Timeout,
    /// The write-processing service was unreachable.
    Connect,
    /// Local failure building or sending the request.
    Other,
}

/// Gateway error taxonomy. Every error is handled at the request boundary
/// and converted to the structured envelope; none propagate past the router.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Backend or write-processing failure reported by the upstream itself.
    /// `message` is sanitized for the caller; raw detail goes in `details`
    /// or the log, never in `message`.
    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// The write RPC never produced an upstream-reported outcome.
    #[error("{message}")]
    Forwarding {
        message: String,
        cause: ForwardingCause,
    },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            details: None,
        }
    }

    pub fn upstream_with_details(
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::Upstream {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn forwarding(message: impl Into<String>, cause: ForwardingCause) -> Self {
        Self::Forwarding {
            message: message.into(),
            cause,
        }
    }

    /// HTTP status this error maps to at the request boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Upstream { .. } => 500,
            Self::Forwarding { cause, .. } => match cause {
                ForwardingCause::Timeout | ForwardingCause::Connect => 502,
                ForwardingCause::Other => 500,
            },
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Error category for logging and monitoring.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Upstream { .. } => ErrorCategory::Upstream,
            Self::Forwarding { .. } => ErrorCategory::Forwarding,
        }
    }
}

/// Error categories for monitoring and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    Validation,
    NotFound,
    Upstream,
    Forwarding,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Upstream => write!(f, "upstream"),
            Self::Forwarding => write!(f, "forwarding"),
        }
    }
}
