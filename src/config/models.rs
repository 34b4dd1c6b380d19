//! Configuration data structures for the gateway.
//!
//! Defines the schema for application settings: server parameters, the
//! credential store backend, pool behaviour, upstream endpoints, model
//! routing overrides, logging and telemetry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::upstream::UpstreamConfig;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port, workers).
    #[serde(default)]
    pub server: ServerConfig,

    /// Credential store backend selection and settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Account pool rotation and cooldown settings.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Upstream provider endpoints and timeouts.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Model routing overrides: requested model name -> target.
    #[serde(default)]
    pub routes: HashMap<String, RouteOverrideConfig>,

    /// Usage telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The IP address or hostname the server should bind to.
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `8080`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads for the Axum server.
    /// Default: Number of logical CPU cores.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Credential store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind: `file`, `git`, `object` or `sqlite`.
    /// Default: `file`
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Directory holding account records (file and git backends).
    /// Default: `~/.polygate/accounts`
    #[serde(default = "default_store_dir")]
    pub dir: String,

    /// Git remote to push/pull (git backend). Optional.
    #[serde(default)]
    pub git_remote: Option<String>,

    /// Object store settings (object backend).
    #[serde(default)]
    pub object: ObjectStoreSettings,

    /// SQLite database path (sqlite backend).
    /// Default: `~/.polygate/accounts.db`
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObjectStoreSettings {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_object_prefix")]
    pub prefix: String,
}

/// Account pool behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Whether quota cooldowns are tracked at all. When off every account
    /// counts as always active.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub cooldown_enabled: bool,

    /// Seconds before expiry at which tokens are refreshed.
    /// Default: `300` (5 minutes)
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_seconds: i64,

    /// Per-provider daily quota reset hour (UTC). Missing providers use
    /// midnight.
    #[serde(default)]
    pub reset_hours: HashMap<String, u32>,

    /// Interval of the housekeeping sweep (cooldown promotion, proactive
    /// refresh). Default: `300`
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

/// One model routing override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOverrideConfig {
    /// Target provider: `claude`, `gemini` or `openai`.
    pub provider: String,
    /// Upstream model name sent to that provider.
    pub model: String,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Usage telemetry sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Bounded capacity of the usage record channel.
    /// Default: `1024`
    #[serde(default = "default_telemetry_capacity")]
    pub queue_capacity: usize,
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            dir: default_store_dir(),
            git_remote: None,
            object: ObjectStoreSettings::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            cooldown_enabled: true,
            refresh_buffer_seconds: default_refresh_buffer(),
            reset_hours: HashMap::new(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_telemetry_capacity(),
        }
    }
}

// Helper functions for serde defaults and shared constants

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_store_backend() -> String {
    "file".to_string()
}

fn config_home() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".polygate")
}

fn default_store_dir() -> String {
    config_home().join("accounts").to_string_lossy().to_string()
}

fn default_sqlite_path() -> String {
    config_home().join("accounts.db").to_string_lossy().to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_object_prefix() -> String {
    "polygate/accounts".to_string()
}

fn default_true() -> bool {
    true
}

fn default_refresh_buffer() -> i64 {
    300 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_telemetry_capacity() -> usize {
    1024
}
