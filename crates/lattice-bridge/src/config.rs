//! # Bridge Configuration
//!
//! Environment-based configuration for the Lattice connection and the
//! publisher's retry and batching policy.

use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.anduril.com";

/// Retry and batching policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Attempts per publish, including the first
    pub max_retries: u32,

    /// Base backoff; attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,

    /// Buffered entries that trigger an automatic flush
    pub batch_size: usize,

    /// Age of the oldest buffered entry that triggers an automatic flush
    pub batch_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            batch_size: 10,
            batch_timeout: Duration::from_millis(1000),
        }
    }
}

/// Lattice connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatticeConfig {
    /// Bearer token; `None` selects mock mode
    pub api_key: Option<String>,

    /// Base URL without trailing slash
    pub api_url: String,

    /// Environment label (production, staging, ...)
    pub environment: String,

    /// Per-request timeout
    pub timeout: Duration,

    pub publisher: PublisherConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            environment: "production".to_string(),
            timeout: Duration::from_secs(10),
            publisher: PublisherConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl LatticeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            api_key: lookup("LATTICE_API_KEY").filter(|key| !key.trim().is_empty()),

            api_url: lookup("LATTICE_API_URL")
                .map_or(defaults.api_url, |url| url.trim_end_matches('/').to_string()),

            environment: lookup("LATTICE_ENVIRONMENT").unwrap_or(defaults.environment),

            timeout: parsed("LATTICE_TIMEOUT_SECS")
                .map_or(defaults.timeout, Duration::from_secs),

            publisher: PublisherConfig {
                max_retries: parsed("PUBLISH_MAX_RETRIES")
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(defaults.publisher.max_retries),
                retry_delay: parsed("PUBLISH_RETRY_DELAY_MS")
                    .map_or(defaults.publisher.retry_delay, Duration::from_millis),
                batch_size: parsed("PUBLISH_BATCH_SIZE")
                    .and_then(|v| usize::try_from(v).ok())
                    .filter(|&size| size > 0)
                    .unwrap_or(defaults.publisher.batch_size),
                batch_timeout: parsed("PUBLISH_BATCH_TIMEOUT_MS")
                    .map_or(defaults.publisher.batch_timeout, Duration::from_millis),
            },

            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Whether publishes should go to the in-process mock transport
    #[must_use]
    pub const fn is_mock(&self) -> bool {
        self.api_key.is_none()
    }
}
