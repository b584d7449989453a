//! Configuration module for the Lakehouse Sink
//!
//! This module handles all configuration aspects including:
//! - Lakehouse SQL endpoint connection details
//! - Staging storage selection (S3 or local filesystem)
//! - Target schema resolution per stream
//! - Batch processing and flush triggers
//! - Environment variable overrides

use crate::error::{SinkError, SinkResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend for staged batch files
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3 (or S3-compatible like MinIO)
    S3,
    /// Local filesystem (development and tests)
    Local,
}

/// What to do when a record fails schema validation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationFailure {
    /// Abort the process (default)
    #[default]
    Fail,
    /// Log a warning and buffer the record anyway
    Warn,
}

/// Per-stream target schema override
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaMapping {
    pub target_schema: String,
}

/// Complete configuration for the Lakehouse Sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LakehouseSinkConfig {
    /// Lakehouse SQL endpoint
    pub engine: EngineConfig,

    /// Staging area for batch files
    pub staging: StagingConfig,

    /// Target schema used when a stream has no `schema_mapping` entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target_schema: Option<String>,

    /// Stream (or source schema) → target schema overrides
    #[serde(default)]
    pub schema_mapping: HashMap<String, SchemaMapping>,

    /// Flush a stream once it buffers this many distinct rows (unset = only at end of input)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size_rows: Option<usize>,

    /// Flush once this many seconds elapsed since the last flush
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_wait_limit_seconds: Option<f64>,

    /// Flush every non-empty stream whenever any stream flushes
    #[serde(default)]
    pub flush_all_streams: bool,

    /// Physically delete rows flagged with `_sdc_deleted_at`
    #[serde(default)]
    pub hard_delete: bool,

    /// Add `_sdc_extracted_at`, `_sdc_batched_at` and `_sdc_deleted_at` columns
    #[serde(default)]
    pub add_metadata_columns: bool,

    /// Maximum nesting level flattened into separate columns
    #[serde(default)]
    pub data_flattening_max_level: usize,

    /// Validate records against their stream schema before buffering
    #[serde(default)]
    pub validate_records: bool,

    /// Behaviour on validation failure when `validate_records` is on
    #[serde(default)]
    pub validation_failure: ValidationFailure,

    /// Reject streams that declare no key properties
    #[serde(default = "default_true")]
    pub primary_key_required: bool,

    /// Directory for batch files (defaults to the OS temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Write plain instead of gzip-compressed batch files
    #[serde(default)]
    pub no_compression: bool,

    /// Streams flushed concurrently in one pass (0 = one per stream, capped by max_parallelism)
    #[serde(default)]
    pub parallelism: usize,

    /// Upper bound for automatic parallelism
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

/// Lakehouse SQL endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the SQL endpoint (e.g., "https://sql.lakehouse.example.com")
    pub host: String,

    /// Lakehouse (compute cluster) name
    pub lakehouse: String,

    /// User name
    pub user: String,

    /// Password; prefer the LAKEHOUSE_PASSWORD environment variable
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Catalog holding the target schemas
    #[serde(default = "default_catalog")]
    pub catalog: String,

    /// Statement timeout; a timeout is fatal
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Staging storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Storage backend (s3 or local)
    pub storage_backend: StorageBackend,

    /// Bucket holding staged files (required if storage_backend = "s3")
    /// Credentials from environment: AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,

    /// AWS S3 region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,

    /// S3 endpoint URL (optional, for MinIO or custom S3-compatible storage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,

    /// Allow HTTP for S3 (useful for MinIO local testing)
    #[serde(default)]
    pub s3_allow_http: bool,

    /// Prefix prepended to every staged key
    #[serde(default)]
    pub s3_key_prefix: String,

    /// Root directory for staged files (required if storage_backend = "local")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

// Default values
fn default_true() -> bool {
    true
}

fn default_max_parallelism() -> usize {
    16
}

fn default_catalog() -> String {
    "spark_catalog".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl LakehouseSinkConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml(contents: &str) -> SinkResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| SinkError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> SinkResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            SinkError::config(format!("Failed to read config file '{}': {}", path, e))
        })?;

        let mut config: Self = toml::from_str(&contents).map_err(|e| {
            SinkError::config(format!("Failed to parse config file '{}': {}", path, e))
        })?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the first CLI argument or LAKEHOUSE_SINK_CONFIG_PATH
    pub fn load() -> SinkResult<Self> {
        let config_path = env::args()
            .nth(1)
            .or_else(|| env::var("LAKEHOUSE_SINK_CONFIG_PATH").ok())
            .ok_or_else(|| {
                SinkError::config(
                    "No configuration given. Pass the path of your sink.toml as the first \
                     argument or set LAKEHOUSE_SINK_CONFIG_PATH.",
                )
            })?;

        Self::from_file(&config_path)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("LAKEHOUSE_HOST") {
            tracing::info!("Overriding engine host from environment");
            self.engine.host = host;
        }

        if let Ok(user) = env::var("LAKEHOUSE_USER") {
            self.engine.user = user;
        }

        if let Ok(password) = env::var("LAKEHOUSE_PASSWORD") {
            self.engine.password = password;
        }

        if let Ok(region) = env::var("AWS_REGION") {
            self.staging.s3_region = Some(region);
        }

        if let Ok(endpoint) = env::var("S3_ENDPOINT") {
            self.staging.s3_endpoint = Some(endpoint);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> SinkResult<()> {
        let mut errors = Vec::new();

        let required = [
            ("engine.host", &self.engine.host),
            ("engine.lakehouse", &self.engine.lakehouse),
            ("engine.user", &self.engine.user),
            ("engine.password", &self.engine.password),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                errors.push(format!("Required key is missing from config: [{}]", key));
            }
        }

        let has_default_schema = self
            .default_target_schema
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_default_schema && self.schema_mapping.is_empty() {
            errors.push(
                "Neither 'default_target_schema' (string) nor 'schema_mapping' (table) keys set in config."
                    .to_string(),
            );
        }

        match self.staging.storage_backend {
            StorageBackend::S3 => {
                if self.staging.s3_bucket.as_deref().unwrap_or("").is_empty() {
                    errors.push("s3_bucket is required when storage_backend = 's3'".to_string());
                }
            }
            StorageBackend::Local => {
                if self.staging.local_path.is_none() {
                    errors.push(
                        "local_path is required when storage_backend = 'local'".to_string(),
                    );
                }
            }
        }

        if self.batch_size_rows == Some(0) {
            errors.push("batch_size_rows must be greater than zero".to_string());
        }

        if let Some(limit) = self.batch_wait_limit_seconds {
            if !(limit > 0.0) {
                errors.push("batch_wait_limit_seconds must be greater than zero".to_string());
            } else if Duration::try_from_secs_f64(limit).is_err() {
                errors.push(format!(
                    "batch_wait_limit_seconds is not a representable duration: {}",
                    limit
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SinkError::config(errors.join("; ")))
        }
    }

    /// Time-based flush trigger, if configured
    pub fn batch_wait_limit(&self) -> Option<Duration> {
        self.batch_wait_limit_seconds
            .and_then(|limit| Duration::try_from_secs_f64(limit).ok())
    }

    /// Whether metadata columns are added to every table
    pub fn metadata_columns_enabled(&self) -> bool {
        self.add_metadata_columns || self.hard_delete
    }

    /// Number of streams flushed concurrently for a pass over `streams` streams
    pub fn effective_parallelism(&self, streams: usize) -> usize {
        let parallelism = if self.parallelism == 0 {
            streams.min(self.max_parallelism)
        } else {
            self.parallelism
        };
        parallelism.max(1)
    }

    /// Resolve the target schema of a stream
    ///
    /// `schema_mapping` is looked up by full stream id first, then by the
    /// source schema part of the stream id.
    pub fn target_schema_for(&self, stream: &str, source_schema: Option<&str>) -> SinkResult<String> {
        let mapped = self
            .schema_mapping
            .get(stream)
            .or_else(|| source_schema.and_then(|s| self.schema_mapping.get(s)))
            .map(|m| m.target_schema.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(schema) = mapped {
            return Ok(schema);
        }

        self.default_target_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                SinkError::config(format!(
                    "Target schema name not defined in config. Neither 'default_target_schema' \
                     (string) nor 'schema_mapping' (table) defines target schema for {} stream.",
                    stream
                ))
            })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> LakehouseSinkConfig {
    LakehouseSinkConfig {
        engine: EngineConfig {
            host: "http://localhost:8080".to_string(),
            lakehouse: "test".to_string(),
            user: "user".to_string(),
            password: "secret".to_string(),
            catalog: default_catalog(),
            request_timeout_secs: 30,
        },
        staging: StagingConfig {
            storage_backend: StorageBackend::Local,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_allow_http: false,
            s3_key_prefix: String::new(),
            local_path: Some(PathBuf::from("/tmp/lakehouse-staging")),
        },
        default_target_schema: Some("analytics".to_string()),
        schema_mapping: HashMap::new(),
        batch_size_rows: None,
        batch_wait_limit_seconds: None,
        flush_all_streams: false,
        hard_delete: false,
        add_metadata_columns: false,
        data_flattening_max_level: 0,
        validate_records: false,
        validation_failure: ValidationFailure::Fail,
        primary_key_required: true,
        temp_dir: None,
        no_compression: false,
        parallelism: 0,
        max_parallelism: default_max_parallelism(),
    }
}
