//! Configuration loading for the possync server.
//!
//! Three sources, later ones override earlier ones:
//! 1. Hardcoded defaults
//! 2. YAML configuration file
//! 3. Environment variables (`POSSYNC_` prefix, `__` as nested separator)
//!
//! # Example
//!
//! ```ignore
//! use possync_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub server: HttpSettings,

    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Job queue settings
    #[serde(default)]
    pub queue: QueueSettings,

    /// Schema registry settings
    #[serde(default)]
    pub schemas: SchemaSettings,

    /// Ledger retention settings
    #[serde(default)]
    pub ledger: LedgerSettings,

    /// API key authentication settings
    #[serde(default)]
    pub auth: AuthSettings,

    /// Client activity tracking settings
    #[serde(default)]
    pub activity: ActivitySettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HttpSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes. NDJSON uploads from terminals can
    /// carry a full day of tickets in one request.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Enable permissive CORS (development setups with a browser dashboard)
    #[serde(default)]
    pub cors_enabled: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            cors_enabled: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    100 * 1024 * 1024
}

/// Storage backend settings.
///
/// Overridable via environment variables with the `POSSYNC_` prefix and `__`
/// as the nested key separator:
///
/// - `POSSYNC_STORAGE__BACKEND=postgres`
/// - `POSSYNC_STORAGE__DATABASE_URL=postgres://...`
/// - `POSSYNC_STORAGE__MAX_CONNECTIONS=20`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "postgres")
    pub database_url: Option<String>,

    /// Maximum connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-statement timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    30
}

/// Job queue settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QueueSettings {
    /// Number of worker tasks applying batches
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded queue capacity; submissions beyond it are rejected
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Delivery attempts per batch before the job is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

/// Schema registry settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SchemaSettings {
    /// Directory holding `<table>.json` field descriptor files
    #[serde(default = "default_schema_dir")]
    pub dir: String,

    /// Reject batches for tables without a schema file instead of applying
    /// them with best-effort conversion
    #[serde(default)]
    pub strict_tables: bool,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            dir: default_schema_dir(),
            strict_tables: false,
        }
    }
}

fn default_schema_dir() -> String {
    "schemas".to_string()
}

/// Ledger retention settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LedgerSettings {
    /// Age in days beyond which ledger entries may be pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Enable the background pruner
    #[serde(default)]
    pub prune_enabled: bool,

    /// Interval between prune passes in seconds
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            prune_enabled: false,
            prune_interval_secs: default_prune_interval(),
        }
    }
}

fn default_retention_days() -> u32 {
    90
}

fn default_prune_interval() -> u64 {
    3600
}

/// API key authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AuthSettings {
    /// Require `X-API-Key` on ingress and telemetry endpoints.
    /// Disabled by default so development setups work without seeded keys.
    #[serde(default)]
    pub enabled: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { enabled: false }
    }
}

/// Client activity tracking settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActivitySettings {
    /// Interval between buffer flushes in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
        }
    }
}

fn default_flush_interval() -> u64 {
    1
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Expose the Prometheus endpoint at /metrics
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Loads configuration from a YAML file with environment variable
    /// overrides.
    ///
    /// Environment variables are prefixed with `POSSYNC_` and use `__` as
    /// separator. For example:
    /// - `POSSYNC_SERVER__PORT=9090` overrides `server.port`
    /// - `POSSYNC_STORAGE__DATABASE_URL=...` overrides `storage.database_url`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("POSSYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Loads configuration from defaults and `POSSYNC_` environment
    /// variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(
                Environment::with_prefix("POSSYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.port == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        let valid_backends = ["memory", "postgres"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        if self.storage.backend == "postgres"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: "storage.database_url is required when backend is 'postgres'".to_string(),
            });
        }

        if self.queue.workers == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "queue.workers must be greater than 0".to_string(),
            });
        }

        if self.queue.capacity == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "queue.capacity must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        if self.ledger.retention_days == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "ledger.retention_days must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
