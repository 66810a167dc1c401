//! Runtime configuration for the model engine.

use crate::error::{OrmError, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrmConfig {
    /// Page size used when `paginate` is called without a limit.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Log every statement at debug level.
    #[serde(default = "default_log_queries")]
    pub log_queries: bool,

    /// Statements slower than this are logged at warn level.
    #[serde(default = "default_slow_query_threshold")]
    pub slow_query_threshold_ms: u64,

    /// Batch size used by `chunk` when none is given.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_page_size() -> usize {
    10
}

fn default_log_queries() -> bool {
    true
}

fn default_slow_query_threshold() -> u64 {
    250
}

fn default_chunk_size() -> usize {
    100
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            log_queries: default_log_queries(),
            slow_query_threshold_ms: default_slow_query_threshold(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl OrmConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `TX2_ORM_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_var("TX2_ORM_DEFAULT_PAGE_SIZE")? {
            config.default_page_size = value;
        }
        if let Some(value) = env_var("TX2_ORM_LOG_QUERIES")? {
            config.log_queries = value;
        }
        if let Some(value) = env_var("TX2_ORM_SLOW_QUERY_MS")? {
            config.slow_query_threshold_ms = value;
        }
        if let Some(value) = env_var("TX2_ORM_CHUNK_SIZE")? {
            config.chunk_size = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(OrmError::Schema("default_page_size must be positive".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(OrmError::Schema("chunk_size must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OrmError::Schema(format!("invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
