//! Cache stage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Cache stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Instance tag, used to label metrics and logs.
    pub tag: String,

    /// Maximum number of cached entries.
    pub size: usize,

    /// Store TTL in seconds for NOERROR responses with answers. A value
    /// above zero enables lazy (stale-while-revalidate) serving.
    pub lazy_cache_ttl: u64,

    /// RR TTL in seconds applied to responses served from expired
    /// entries.
    pub lazy_cache_reply_ttl: u32,

    /// Snapshot file path. Unset disables persistence.
    pub dump_file: Option<PathBuf>,

    /// Seconds between snapshot attempts.
    pub dump_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tag: "cache".to_string(),
            size: 1024,
            lazy_cache_ttl: 0,
            lazy_cache_reply_ttl: 5,
            dump_file: None,
            dump_interval: 600,
        }
    }
}

impl CacheConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.dump_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dump_interval",
                message: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}
