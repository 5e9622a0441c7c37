use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the image storage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Image record configuration
    #[serde(default)]
    pub images: ImagesConfig,
    /// Expired record sweep configuration
    #[serde(default)]
    pub retention: RetentionConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding customer images
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned upload URL lifetime in seconds
    #[serde(default = "default_upload_url_expiry_secs")]
    pub upload_url_expiry_secs: u64,
    /// Presigned download URL lifetime in seconds
    #[serde(default = "default_download_url_expiry_secs")]
    pub download_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Image record configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    /// TTL applied when a request does not carry one
    #[serde(default = "default_ttl_days")]
    pub default_ttl_days: u32,
    /// Upper bound on list page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

/// Expired record sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Run the sweeper at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Records examined per sweep
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: i64,
    /// Concurrent record purges
    #[serde(default = "default_sweep_concurrency")]
    pub concurrency: usize,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "image-storage".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bucket() -> String {
    "matsight-customer-images".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_upload_url_expiry_secs() -> u64 {
    900
}

fn default_download_url_expiry_secs() -> u64 {
    3600
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_ttl_days() -> u32 {
    crate::record::DEFAULT_TTL_DAYS
}

fn default_max_page_size() -> i64 {
    100
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_batch_size() -> i64 {
    100
}

fn default_sweep_concurrency() -> usize {
    10
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/storage").required(false))
            .add_source(config::File::with_name("/etc/matsight/storage").required(false))
            // IMAGE_STORAGE__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("IMAGE_STORAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.images.max_page_size < 1 {
            anyhow::bail!(
                "images.max_page_size must be at least 1, got {}",
                self.images.max_page_size
            );
        }
        if self.retention.interval_secs == 0 {
            anyhow::bail!("retention.interval_secs must be at least 1");
        }
        if self.retention.batch_size < 1 {
            anyhow::bail!(
                "retention.batch_size must be at least 1, got {}",
                self.retention.batch_size
            );
        }
        Ok(())
    }

    pub fn upload_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.upload_url_expiry_secs)
    }

    pub fn download_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.download_url_expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            upload_url_expiry_secs: default_upload_url_expiry_secs(),
            download_url_expiry_secs: default_download_url_expiry_secs(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: default_ttl_days(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
            batch_size: default_sweep_batch_size(),
            concurrency: default_sweep_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
