//! Static table of tenant-scoped resources served by the gateway.
//!
//! Each tracked resource ties a read endpoint to the backing table whose
//! change events invalidate it. The table is the single source of truth
//! for routing, cache keys, and change-feed subscriptions.

/// One cacheable read endpoint and its backing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedResource {
    pub path: &'static str,
    pub table: &'static str,
    /// Human-readable name used in not-found messages.
    pub display_name: &'static str,
    /// Single-row resources 404 when the tenant has no row; list
    /// resources return an empty collection instead.
    pub singleton: bool,
}

pub const TRACKED_RESOURCES: &[TrackedResource] = &[
    TrackedResource {
        path: "/architecture/config",
        table: "architecture_configs",
        display_name: "Architecture config",
        singleton: true,
    },
    TrackedResource {
        path: "/architecture/metrics",
        table: "performance_metrics",
        display_name: "Performance metrics",
        singleton: false,
    },
    TrackedResource {
        path: "/compliance/status",
        table: "compliance_checks",
        display_name: "Compliance status",
        singleton: true,
    },
    TrackedResource {
        path: "/patients",
        table: "patients",
        display_name: "Patient list",
        singleton: false,
    },
    TrackedResource {
        path: "/appointments",
        table: "appointments",
        display_name: "Appointment list",
        singleton: false,
    },
];

/// Write-initiation path prefixes, never cached.
pub const WRITE_PATH_PREFIXES: &[&str] = &["/analysis"];

pub fn resource_for_path(path: &str) -> Option<&'static TrackedResource> {
    TRACKED_RESOURCES.iter().find(|r| r.path == path)
}

pub fn table_for_path(path: &str) -> Option<&'static str> {
    resource_for_path(path).map(|r| r.table)
}

/// Maps a change-feed table to the read path it invalidates.
/// Unmapped tables fall back to pattern invalidation by table name.
pub fn path_for_table(table: &str) -> Option<&'static str> {
    TRACKED_RESOURCES
        .iter()
        .find(|r| r.table == table)
        .map(|r| r.path)
}
