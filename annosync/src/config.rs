//! Configuration constants and runtime configuration
//!
//! Central location for the constants used by the sync engine, plus
//! `AppConfig`, which is read from the environment when wiring the app.

use crate::error::{AppError, Result};
use std::path::PathBuf;

// ===== Queue Persistence =====

/// Key under which the pending-operation queue is stored as one JSON value
pub const PENDING_ANNOTATIONS_KEY: &str = "pending_annotations";

/// Where an unparseable queue value is kept before the queue is rewritten
pub const UNREADABLE_QUEUE_KEY: &str = "pending_annotations_unreadable";

// ===== Remote Service =====

/// Remote record collection holding annotations
pub const DEFAULT_ANNOTATIONS_TABLE: &str = "annotations";

/// Default timeout for remote requests in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of response body characters written to the debug log
pub const MAX_LOG_BODY_CHARS: usize = 512;

// ===== Logging =====

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "annosync=debug,info";

// ===== Environment Variables =====

pub const ENV_REMOTE_URL: &str = "ANNOSYNC_REMOTE_URL";
pub const ENV_API_KEY: &str = "ANNOSYNC_API_KEY";
pub const ENV_TABLE: &str = "ANNOSYNC_TABLE";
pub const ENV_DB_PATH: &str = "ANNOSYNC_DB_PATH";
pub const ENV_TIMEOUT_SECS: &str = "ANNOSYNC_TIMEOUT_SECS";
/// Signed-in user for the command-line flush
pub const ENV_USER_ID: &str = "ANNOSYNC_USER_ID";
pub const ENV_ACCESS_TOKEN: &str = "ANNOSYNC_ACCESS_TOKEN";

/// Runtime configuration for the remote service and local persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Base URL of the remote data service (e.g. "https://xyz.supabase.co")
    pub remote_url: String,
    /// Public API key sent with every request
    pub api_key: String,
    pub table: String,
    /// SQLite file holding the durable key-value store
    pub database_path: PathBuf,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn new(
        remote_url: impl Into<String>,
        api_key: impl Into<String>,
        database_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_url: remote_url.into(),
            api_key: api_key.into(),
            table: DEFAULT_ANNOTATIONS_TABLE.to_string(),
            database_path: database_path.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Build configuration from `ANNOSYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Config(format!("{} is not set", key)))
        };

        let mut config = Self::new(
            required(ENV_REMOTE_URL)?,
            required(ENV_API_KEY)?,
            required(ENV_DB_PATH)?,
        );

        if let Some(table) = lookup(ENV_TABLE).filter(|t| !t.trim().is_empty()) {
            config.table = table.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AppError::Config(format!("{} must be a number of seconds: {}", ENV_TIMEOUT_SECS, raw))
            })?;
            if secs == 0 {
                return Err(AppError::Config(format!(
                    "{} must be greater than 0",
                    ENV_TIMEOUT_SECS
                )));
            }
            config.request_timeout_secs = secs;
        }

        Ok(config)
    }
}
