//! Error types for the annotation sync engine
//!
//! All errors use thiserror for structured error handling.
//! Gateway failures carry enough detail to classify them for retry.

use thiserror::Error;

/// Retry policy class for a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error response from the remote annotation service
    #[error("Gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("No authenticated user")]
    Unauthenticated,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Create a gateway error from status and message
    pub fn gateway(status: u16, message: impl Into<String>) -> Self {
        Self::Gateway {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this is a gateway error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Gateway { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Gateway { status, .. } => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Http(e) if e.is_decode() => RetryClass::Permanent,
            Self::Http(_) | Self::Io(_) | Self::Database(_) => RetryClass::Retryable,
            Self::Unauthenticated => RetryClass::ReauthRequired,
            Self::Serialization(_)
            | Self::Config(_)
            | Self::Generic(_) => RetryClass::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
