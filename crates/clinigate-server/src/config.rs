//! Gateway configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then environment variables with the `CLINIGATE` prefix. Nested keys
//! use a double underscore, e.g. `CLINIGATE__SERVER__PORT=9090`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use clinigate_core::WRITE_PATH_PREFIXES;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Identity provider used by the token verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    /// Project API key sent alongside the caller's bearer token.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_auth_timeout_ms")]
    pub timeout_ms: u64,
}

/// Tenant data store queried on cache misses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    /// Service-role key; read queries run with elevated access and are
    /// scoped to the tenant by the gateway itself.
    #[serde(default)]
    pub service_key: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

/// Downstream write processor that mutating requests are handed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    #[serde(default = "default_forward_url")]
    pub base_url: String,
    /// Operation name appended to `base_url` when forwarding.
    #[serde(default = "default_forward_operation")]
    pub operation: String,
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Path prefixes that never pass through the read cache.
    #[serde(default = "default_bypass_paths")]
    pub bypass_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// When disabled the gateway serves reads without change-driven
    /// invalidation; entries only age out via their TTL.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            api_key: String::new(),
            timeout_ms: default_auth_timeout_ms(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            service_key: String::new(),
            timeout_ms: default_backend_timeout_ms(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            base_url: default_forward_url(),
            operation: default_forward_operation(),
            timeout_ms: default_forward_timeout_ms(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            bypass_paths: default_bypass_paths(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: default_redis_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|_| anyhow::anyhow!("server.host is not a valid IP address: {}", self.server.host))?;
        if self.auth.base_url.is_empty() {
            anyhow::bail!("auth.base_url must be set");
        }
        if self.backend.base_url.is_empty() {
            anyhow::bail!("backend.base_url must be set");
        }
        if self.forward.base_url.is_empty() {
            anyhow::bail!("forward.base_url must be set");
        }
        if self.forward.operation.is_empty() {
            anyhow::bail!("forward.operation must be set");
        }
        if self.forward.timeout_ms == 0 {
            anyhow::bail!("forward.timeout_ms must be non-zero");
        }
        if self.cache.default_ttl_secs == 0 {
            anyhow::bail!("cache.default_ttl_secs must be non-zero");
        }
        if self.cache.sweep_interval_secs == 0 {
            anyhow::bail!("cache.sweep_interval_secs must be non-zero");
        }
        if self.feed.enabled && self.feed.redis_url.is_empty() {
            anyhow::bail!("feed.redis_url must be set when the feed is enabled");
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("logging.level must be one of trace/debug/info/warn/error, got {other}"),
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.server.host.parse()?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn is_bypass_path(&self, path: &str) -> bool {
        self.bypass_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_platform_url() -> String {
    "http://127.0.0.1:54321".to_string()
}

fn default_forward_url() -> String {
    "http://127.0.0.1:54321/functions/v1".to_string()
}

fn default_forward_operation() -> String {
    "analysis-run".to_string()
}

fn default_auth_timeout_ms() -> u64 {
    5_000
}

fn default_backend_timeout_ms() -> u64 {
    10_000
}

fn default_forward_timeout_ms() -> u64 {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_bypass_paths() -> Vec<String> {
    WRITE_PATH_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

pub mod loader {
    use std::path::Path;

    use config::{Config, Environment, File};

    use super::AppConfig;

    /// Loads configuration from an optional TOML file plus `CLINIGATE`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            } else {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CLINIGATE")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
