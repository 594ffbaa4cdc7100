//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, restrict this endpoint to the scraper at the
    /// network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Largest body accepted by the single-shot upload endpoint.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_upload_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Catalog (relational metadata) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer SILO_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/catalog.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Fast-path cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of cached content records.
    #[serde(default = "default_file_meta_ttl_secs")]
    pub file_meta_ttl_secs: u64,
    /// Interval between sweeps that evict expired keys.
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_file_meta_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_cache_sweep_interval_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_meta_ttl_secs: default_file_meta_ttl_secs(),
            sweep_interval_secs: default_cache_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn file_meta_ttl(&self) -> Duration {
        Duration::from_secs(self.file_meta_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Message queue configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Deliveries after which a repeatedly failing message is parked.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    /// Delay before a nacked message is redelivered.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Bound on messages waiting to enter the broker.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_deliveries: default_max_deliveries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Upload and multipart session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Multipart chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// TTL of an open multipart session.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// TTL a completed session is kept for audit.
    #[serde(default = "default_completed_session_ttl_secs")]
    pub completed_session_ttl_secs: u64,
    /// Lease of the per-hash dedup lock.
    #[serde(default = "default_upload_lock_ttl_secs")]
    pub upload_lock_ttl_secs: u64,
    /// Lease of the per-session merge lock.
    #[serde(default = "default_merge_lock_ttl_secs")]
    pub merge_lock_ttl_secs: u64,
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_completed_session_ttl_secs() -> u64 {
    3600
}

fn default_upload_lock_ttl_secs() -> u64 {
    10
}

fn default_merge_lock_ttl_secs() -> u64 {
    600
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            session_ttl_secs: default_session_ttl_secs(),
            completed_session_ttl_secs: default_completed_session_ttl_secs(),
            upload_lock_ttl_secs: default_upload_lock_ttl_secs(),
            merge_lock_ttl_secs: default_merge_lock_ttl_secs(),
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn completed_session_ttl(&self) -> Duration {
        Duration::from_secs(self.completed_session_ttl_secs)
    }

    pub fn upload_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_lock_ttl_secs)
    }

    pub fn merge_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.merge_lock_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(crate::MIN_CHUNK_SIZE..=crate::MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(crate::Error::InvalidChunkSize {
                size: self.chunk_size,
                min: crate::MIN_CHUNK_SIZE,
                max: crate::MAX_CHUNK_SIZE,
            }
            .to_string());
        }
        for (name, value) in [
            ("upload.session_ttl_secs", self.session_ttl_secs),
            (
                "upload.completed_session_ttl_secs",
                self.completed_session_ttl_secs,
            ),
            ("upload.upload_lock_ttl_secs", self.upload_lock_ttl_secs),
            ("upload.merge_lock_ttl_secs", self.merge_lock_ttl_secs),
        ] {
            if value == 0 {
                return Err(format!("{name} cannot be 0"));
            }
        }
        Ok(())
    }
}

/// Deferred deletion configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Delay between the last reference disappearing and physical deletion.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Run the periodic reconciliation sweep (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub sweep_enabled: bool,
    /// Interval between reconciliation sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum records reconciled per sweep.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
}

fn default_grace_period_secs() -> u64 {
    crate::DEFAULT_DELETION_GRACE_SECS
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_batch_size() -> u32 {
    500
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            sweep_enabled: default_sweep_enabled(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl DeletionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        // Converted to time::Duration which takes i64
        if self.grace_period_secs > i64::MAX as u64 {
            return Err(format!(
                "deletion.grace_period_secs {} exceeds maximum value {}",
                self.grace_period_secs,
                i64::MAX
            ));
        }
        if self.sweep_enabled && self.sweep_interval_secs == 0 {
            return Err("deletion.sweep_interval_secs cannot be 0".to_string());
        }
        if self.sweep_batch_size == 0 {
            return Err("deletion.sweep_batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Audit log configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Bound on events waiting to be persisted; further events are dropped.
    #[serde(default = "default_audit_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_channel_capacity() -> usize {
    4096
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            channel_capacity: default_audit_channel_capacity(),
        }
    }
}

/// Caller identity configuration.
///
/// Credentials are verified by an upstream gateway, which forwards the
/// verified identity in a request header.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

fn default_identity_header() -> String {
    "x-silo-user".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub deletion: DeletionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses a 1 MiB chunk size, a short grace period
    /// and disables the reconciliation sweep.
    pub fn for_testing() -> Self {
        Self {
            upload: UploadConfig {
                chunk_size: crate::MIN_CHUNK_SIZE,
                ..UploadConfig::default()
            },
            deletion: DeletionConfig {
                grace_period_secs: 1,
                sweep_enabled: false,
                ..DeletionConfig::default()
            },
            queue: QueueConfig {
                retry_backoff_ms: 10,
                ..QueueConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.upload.validate()?;
        self.deletion.validate()?;
        if self.cache.file_meta_ttl_secs == 0 {
            return Err("cache.file_meta_ttl_secs cannot be 0".to_string());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs cannot be 0".to_string());
        }
        if self.queue.max_deliveries == 0 {
            return Err("queue.max_deliveries cannot be 0".to_string());
        }
        if self.queue.channel_capacity == 0 || self.audit.channel_capacity == 0 {
            return Err("queue and audit channel capacities cannot be 0".to_string());
        }
        if self.auth.identity_header.trim().is_empty() {
            return Err("auth.identity_header cannot be empty".to_string());
        }
        // S3 multipart copy requires every part but the last to be >= 5 MiB
        if matches!(self.storage, StorageConfig::S3 { .. })
            && self.upload.chunk_size < crate::DEFAULT_CHUNK_SIZE
        {
            return Err(format!(
                "upload.chunk_size must be at least {} with s3 storage",
                crate::DEFAULT_CHUNK_SIZE
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.upload.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.session_ttl_secs, 86400);
        assert_eq!(config.upload.completed_session_ttl_secs, 3600);
        assert_eq!(config.upload.upload_lock_ttl_secs, 10);
        assert_eq!(config.upload.merge_lock_ttl_secs, 600);
        assert_eq!(config.deletion.grace_period_secs, 259_200);
        assert_eq!(config.cache.file_meta_ttl_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_sections_deserialize_to_defaults() {
        let json = r#"{"upload": {"chunk_size": 2097152}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.upload.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.upload.session_ttl_secs, 86400);
        assert_eq!(config.auth.identity_header, "x-silo-user");
    }

    #[test]
    fn test_chunk_size_bounds() {
        let mut config = AppConfig::default();
        config.upload.chunk_size = 1024;
        assert!(config.validate().is_err());
        config.upload.chunk_size = crate::MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_requires_five_mib_chunks() {
        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(config.validate().is_err());
        config.upload.chunk_size = crate::DEFAULT_CHUNK_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_lock_ttl_rejected() {
        let mut config = AppConfig::default();
        config.upload.upload_lock_ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("upload_lock_ttl_secs"));
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());

        let valid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: false,
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_storage_config_s3_force_path_style_defaults_to_false() {
        let json = r#"{"type":"s3","bucket":"test","endpoint":"https://s3.amazonaws.com"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();

        match config {
            StorageConfig::S3 {
                force_path_style, ..
            } => assert!(!force_path_style),
            _ => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_postgres_config_requires_target() {
        let config: MetadataConfig =
            serde_json::from_str(r#"{"type":"postgres","host":"db"}"#).unwrap();
        assert!(config.validate().is_err());

        let config: MetadataConfig =
            serde_json::from_str(r#"{"type":"postgres","url":"postgres://db/silo"}"#).unwrap();
        assert!(config.validate().is_ok());
    }
}
