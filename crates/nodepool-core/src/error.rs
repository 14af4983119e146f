//! Configuration errors. All of them are fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid spec for pool '{pool}': {reason}")]
    InvalidSpec { pool: String, reason: String },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn spec(pool: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidSpec {
            pool: pool.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn setting(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidSetting {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
