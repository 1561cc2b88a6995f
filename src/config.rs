//! Process configuration, read from the environment at startup.
//!
//! A `.env` file in the working directory is honoured for local development.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let workspace = match std::env::var("COURSEBOOK_WORKSPACE") {
            Ok(v) if v.trim().is_empty() => {
                return Err(ConfigError::InvalidValue(
                    "COURSEBOOK_WORKSPACE".to_string(),
                    "must not be blank".to_string(),
                ))
            }
            Ok(v) => Some(PathBuf::from(v.trim())),
            Err(_) => None,
        };

        let log_filter = std::env::var("COURSEBOOK_LOG").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(&log_filter).map_err(|e| {
            ConfigError::InvalidValue("COURSEBOOK_LOG".to_string(), e.to_string())
        })?;

        Ok(Self {
            workspace,
            log_filter,
        })
    }
}
