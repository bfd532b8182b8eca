//! Configuration loading and types for assetpipe.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default, so an empty file (or no
//! file at all) yields a working local setup.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Request body ceilings.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Storage sink settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL prefixed to every URL returned to clients.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// How long a document update waits for the per-document write lock
    /// before failing with 409 Conflict, in milliseconds.
    #[serde(default = "default_write_lock_timeout_ms")]
    pub write_lock_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            shutdown_timeout: default_shutdown_timeout(),
            write_lock_timeout_ms: default_write_lock_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// `public_url` joined with a route path.
    pub fn public_url_for(&self, route: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), route)
    }
}

/// Ceilings on request bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Whole-body ceiling of a form update, in bytes.
    #[serde(default = "default_max_form_bytes")]
    pub max_form_bytes: u64,

    /// Maximum number of parts in one form.
    #[serde(default = "default_max_form_parts")]
    pub max_form_parts: usize,

    /// Ceiling of a single text field, in bytes.
    #[serde(default = "default_max_field_bytes")]
    pub max_field_bytes: u64,

    /// Ceiling of one uploaded artifact (or source map), in bytes.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_form_bytes: default_max_form_bytes(),
            max_form_parts: default_max_form_parts(),
            max_field_bytes: default_max_field_bytes(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Storage sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `s3` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local filesystem configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// S3 object-store configuration.
    #[serde(default, alias = "aws")]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            s3: None,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// S3 object-store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// Bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix in the bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4001
}

fn default_public_url() -> String {
    "http://localhost:4001".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_write_lock_timeout_ms() -> u64 {
    10_000
}

fn default_max_form_bytes() -> u64 {
    100_000
}

fn default_max_form_parts() -> usize {
    8
}

fn default_max_field_bytes() -> u64 {
    4096
}

fn default_max_artifact_bytes() -> u64 {
    52_428_800 // 50 MiB
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/assets".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
///
/// A missing file yields the defaults; an unreadable or invalid one is an
/// error.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 4001);
        assert_eq!(config.server.public_url, "http://localhost:4001");
        assert_eq!(config.limits.max_form_bytes, 100_000);
        assert_eq!(config.limits.max_form_parts, 8);
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.storage.local.root_dir, "./data/assets");
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  port: 8080
  public_url: "https://assets.example.com/"
storage:
  backend: s3
  s3:
    bucket: my-assets
    prefix: "prod/"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.limits.max_field_bytes, 4096);
        let s3 = config.storage.s3.unwrap();
        assert_eq!(s3.bucket, "my-assets");
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.prefix, "prod/");
        assert!(!s3.use_path_style);
    }

    #[test]
    fn test_public_url_for_trims_trailing_slash() {
        let server = ServerConfig {
            public_url: "https://assets.example.com/".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(
            server.public_url_for("import-map/acme/js"),
            "https://assets.example.com/import-map/acme/js"
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.server.port, 4001);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "server: [not, a, map]").unwrap();
        assert!(load_config(&path).is_err());
    }
}
