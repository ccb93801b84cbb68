//! Core types shared across the Clinigate edge gateway crates.

pub mod context;
pub mod envelope;
pub mod error;
pub mod resources;

pub use context::{CallerId, RequestContext, TenantId};
pub use envelope::{ApiResponse, auth_error_body, error_body, error_body_with_details};
pub use error::{AuthError, ForwardingCause, GatewayError};
pub use resources::{
    TRACKED_RESOURCES, TrackedResource, WRITE_PATH_PREFIXES, path_for_table, resource_for_path,
    table_for_path,
};
