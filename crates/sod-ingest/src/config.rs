//! Pipeline configuration
//!
//! Defaults match the public FDIC endpoints. [`PipelineConfig::from_env`]
//! overlays `SOD_*` environment variables (a `.env` file is honored by the
//! binary through `dotenvy`), and CLI flags override both.

use serde::{Deserialize, Serialize};
use sod_common::SodError;
use std::path::PathBuf;
use std::time::Duration;

/// Largest page the Banks API will return
pub const API_MAX_PAGE_SIZE: usize = 10_000;

pub const DEFAULT_API_BASE_URL: &str = "https://api.fdic.gov/banks/sod";
pub const DEFAULT_BULK_BASE_URL: &str = "https://www.fdic.gov/foia/sod";
pub const DEFAULT_SCHEMA_URL: &str = "https://api.fdic.gov/banks/docs/sod_properties.yaml";
pub const DEFAULT_USER_AGENT: &str = "sod-pipeline/0.1";

/// Retry, backoff, and pacing policy handed to the HTTP client
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor applied per further attempt
    pub multiplier: f64,
    /// Upper bound for a single backoff sleep
    pub max_delay: Duration,
    /// Minimum wait after an HTTP 429
    pub rate_limit_cooldown: Duration,
    /// Courtesy gap between consecutive requests
    pub request_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(10),
            request_interval: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `failed_attempt + 1` (1-based, so the first
    /// retry waits `base_delay`)
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// A policy with no waiting at all, for tests and local mirrors
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            rate_limit_cooldown: Duration::ZERO,
            request_interval: Duration::ZERO,
        }
    }
}

/// Paginated Banks API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Optional key; requests without one face stricter informal limits
    pub api_key: Option<String>,
    /// Records per page, clamped to [`API_MAX_PAGE_SIZE`]
    pub page_size: usize,
    /// Request only these fields; `None` lets the server choose
    pub fields: Option<Vec<String>>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            page_size: API_MAX_PAGE_SIZE,
            fields: None,
        }
    }
}

impl ApiConfig {
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, API_MAX_PAGE_SIZE)
    }
}

/// Legacy bulk archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    pub base_url: String,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BULK_BASE_URL.to_string(),
        }
    }
}

impl BulkConfig {
    pub fn archive_url(&self, year: i32) -> String {
        format!("{}/sod-{}.zip", self.base_url.trim_end_matches('/'), year)
    }
}

/// Field registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub url: String,
    pub cache_path: PathBuf,
    /// Ignore the cache and fetch again
    pub refresh: bool,
    /// When false no descriptions are embedded and nothing is fetched
    pub enabled: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SCHEMA_URL.to_string(),
            cache_path: PathBuf::from("data/.sod_schema_cache.json"),
            refresh: false,
            enabled: true,
        }
    }
}

/// Everything a pipeline run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub bulk: BulkConfig,
    pub schema: SchemaConfig,
    pub retry: RetryPolicy,
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Parallel normalization/summarization workers; 1 means sequential
    pub workers: usize,
    /// Re-download and re-normalize even when artifacts exist
    pub force: bool,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            bulk: BulkConfig::default(),
            schema: SchemaConfig::default(),
            retry: RetryPolicy::default(),
            raw_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("data/processed"),
            workers: default_workers(),
            force: false,
            timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// One worker per available CPU
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// - `SOD_API_BASE_URL`, `SOD_BULK_BASE_URL`, `SOD_SCHEMA_URL`
    /// - `FDIC_API_KEY`
    /// - `SOD_PAGE_SIZE`, `SOD_WORKERS`, `SOD_TIMEOUT_SECS`
    /// - `SOD_RAW_DIR`, `SOD_OUTPUT_DIR`, `SOD_SCHEMA_CACHE`
    /// - `SOD_MAX_ATTEMPTS`, `SOD_BACKOFF_BASE_SECS`, `SOD_BACKOFF_MULTIPLIER`,
    ///   `SOD_REQUEST_DELAY_SECS`, `SOD_RATE_LIMIT_COOLDOWN_SECS`
    pub fn from_env() -> Result<Self, SodError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SOD_API_BASE_URL") {
            config.api.base_url = url;
        }
        if let Ok(url) = std::env::var("SOD_BULK_BASE_URL") {
            config.bulk.base_url = url;
        }
        if let Ok(url) = std::env::var("SOD_SCHEMA_URL") {
            config.schema.url = url;
        }
        if let Ok(key) = std::env::var("FDIC_API_KEY") {
            if !key.trim().is_empty() {
                config.api.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(dir) = std::env::var("SOD_RAW_DIR") {
            config.raw_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SOD_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("SOD_SCHEMA_CACHE") {
            config.schema.cache_path = PathBuf::from(path);
        }

        config.api.page_size = env_parse("SOD_PAGE_SIZE").unwrap_or(config.api.page_size);
        config.workers = env_parse("SOD_WORKERS").unwrap_or(config.workers);
        config.timeout_secs = env_parse("SOD_TIMEOUT_SECS").unwrap_or(config.timeout_secs);
        config.retry.max_attempts =
            env_parse("SOD_MAX_ATTEMPTS").unwrap_or(config.retry.max_attempts);
        config.retry.multiplier =
            env_parse("SOD_BACKOFF_MULTIPLIER").unwrap_or(config.retry.multiplier);
        if let Some(secs) = env_parse::<f64>("SOD_BACKOFF_BASE_SECS") {
            config.retry.base_delay = secs_to_duration(secs)?;
        }
        if let Some(secs) = env_parse::<f64>("SOD_REQUEST_DELAY_SECS") {
            config.retry.request_interval = secs_to_duration(secs)?;
        }
        if let Some(secs) = env_parse::<f64>("SOD_RATE_LIMIT_COOLDOWN_SECS") {
            config.retry.rate_limit_cooldown = secs_to_duration(secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SodError> {
        if self.workers == 0 {
            return Err(SodError::config("workers must be greater than 0"));
        }
        if self.api.page_size == 0 {
            return Err(SodError::config("page size must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SodError::config("max attempts must be greater than 0"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(SodError::config("backoff multiplier must be at least 1.0"));
        }
        if self.timeout_secs == 0 {
            return Err(SodError::config("timeout must be greater than 0"));
        }
        if self.api.base_url.is_empty() || self.bulk.base_url.is_empty() {
            return Err(SodError::config("source base URLs cannot be empty"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Convert a user-supplied seconds value into a [`Duration`]
pub fn secs_to_duration(secs: f64) -> Result<Duration, SodError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| SodError::config(format!("invalid duration in seconds: {}", secs)))
}
