use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Model artifact configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// ROI / LTV business constants
    #[serde(default)]
    pub roi: RoiConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: CHURN__)
            .add_source(
                config::Environment::with_prefix("CHURN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted request body (bytes), bounds CSV uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Allow any origin (the browser front-end is served elsewhere)
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_permissive: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding the artifact bundle (model, feature columns, pipeline, manifest)
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Precomputed global SHAP chart; defaults to `<artifact_dir>/shap_summary.svg`
    pub global_shap_file: Option<PathBuf>,

    /// Number of local attributions returned per prediction
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Probability at or above which a customer is classified as churning
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,

    /// Maximum number of rows accepted in a batch upload
    #[serde(default = "default_max_batch_rows")]
    pub max_batch_rows: usize,
}

impl ModelConfig {
    /// Resolved location of the global SHAP chart
    pub fn global_shap_path(&self) -> PathBuf {
        self.global_shap_file
            .clone()
            .unwrap_or_else(|| self.artifact_dir.join("shap_summary.svg"))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            global_shap_file: None,
            top_k: default_top_k(),
            decision_threshold: default_decision_threshold(),
            max_batch_rows: default_max_batch_rows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: default_true(),
        }
    }
}

/// Business constants for the retention ROI estimate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoiConfig {
    /// Net interest margin earned on balances
    #[serde(default = "default_nim_rate")]
    pub nim_rate: f64,

    /// Annual profit per product held
    #[serde(default = "default_product_profit")]
    pub product_profit: f64,

    /// Annual profit for an active credit-card holder
    #[serde(default = "default_active_card_profit")]
    pub active_card_profit: f64,

    /// Upper bound on expected customer lifespan (years)
    #[serde(default = "default_max_lifespan")]
    pub max_lifespan: f64,

    /// Cost of one retention action
    #[serde(default = "default_retention_cost")]
    pub retention_cost: f64,

    /// Probability a retention action succeeds
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            nim_rate: default_nim_rate(),
            product_profit: default_product_profit(),
            active_card_profit: default_active_card_profit(),
            max_lifespan: default_max_lifespan(),
            retention_cost: default_retention_cost(),
            success_rate: default_success_rate(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts/churn_bank")
}

fn default_top_k() -> usize {
    7
}

fn default_decision_threshold() -> f64 {
    0.5
}

fn default_max_batch_rows() -> usize {
    100_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "churn-bank-service".to_string()
}

fn default_true() -> bool {
    true
}

fn default_nim_rate() -> f64 {
    0.02
}

fn default_product_profit() -> f64 {
    50.0
}

fn default_active_card_profit() -> f64 {
    30.0
}

fn default_max_lifespan() -> f64 {
    10.0
}

fn default_retention_cost() -> f64 {
    500.0
}

fn default_success_rate() -> f64 {
    0.20
}
