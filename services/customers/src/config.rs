use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the customer service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Image compression configuration
    #[serde(default)]
    pub images: ImageConfig,
    /// WhatsApp Cloud API configuration
    pub messaging: MessagingConfig,
    /// Storage usage reporting configuration
    #[serde(default)]
    pub usage: UsageConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
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

/// S3 storage configuration for customer photos
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding customer photos
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, Supabase storage, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL under which objects are publicly readable, e.g.
    /// `https://xyz.supabase.co/storage/v1/object/public/customer-images`
    pub public_base_url: Option<String>,
}

/// Image compression bounds applied before upload
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Target upper bound for the compressed JPEG in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_bytes: usize,
    /// Longest edge of the compressed image in pixels
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// JPEG quality of the first encoding attempt
    #[serde(default = "default_initial_quality")]
    pub initial_quality: u8,
}

/// WhatsApp Cloud API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Graph API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Graph API version segment
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Sending phone number id
    #[serde(default)]
    pub phone_number_id: String,
    /// Bearer token
    #[serde(default)]
    pub access_token: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Storage usage report configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UsageConfig {
    /// Storage quota reported alongside the usage, in MB
    #[serde(default = "default_limit_mb")]
    pub limit_mb: u64,
    /// Maximum number of entries listed per folder
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

/// API configuration
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
    /// Maximum multipart request body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "customer-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
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

fn default_bucket() -> String {
    "customer-images".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_image_bytes() -> usize {
    150 * 1024 // 150KB
}

fn default_max_dimension() -> u32 {
    1200
}

fn default_initial_quality() -> u8 {
    85
}

fn default_api_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_api_version() -> String {
    "v18.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_limit_mb() -> u64 {
    1024
}

fn default_list_limit() -> usize {
    10_000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "customer-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/customers").required(false))
            .add_source(config::File::with_name("/etc/stitch/customers").required(false))
            // CUSTOMERS__MESSAGING__ACCESS_TOKEN -> messaging.access_token
            .add_source(
                config::Environment::with_prefix("CUSTOMERS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField("database.url".to_string()));
        }

        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        if self.messaging.phone_number_id.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "messaging.phone_number_id".to_string(),
            ));
        }

        if self.messaging.access_token.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "messaging.access_token".to_string(),
            ));
        }

        if self.images.max_bytes == 0 || self.images.max_dimension == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "images.max_bytes/max_dimension".to_string(),
                message: "Bounds must be greater than 0".to_string(),
            });
        }

        if !(1..=100).contains(&self.images.initial_quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "images.initial_quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Get the pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl MessagingConfig {
    /// Get the per-request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
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

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_image_bytes(),
            max_dimension: default_max_dimension(),
            initial_quality: default_initial_quality(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            limit_mb: default_limit_mb(),
            list_limit: default_list_limit(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}
