//! Error taxonomy for version resolution and lifecycle enforcement.

use chrono::{DateTime, Utc};
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while resolving or administering API versions.
#[derive(Debug, Clone, Error)]
pub enum VersioningError {
    /// The requested version does not resolve, even after fallback.
    #[error("API version '{}' not found.", .requested.as_deref().unwrap_or("default"))]
    VersionNotFound {
        requested: Option<String>,
        available: Vec<String>,
    },

    /// The resolved version is sunset and the sunset policy rejects it.
    #[error("API version '{version}' has been sunset.")]
    VersionSunset {
        version: String,
        sunset_date: Option<DateTime<Utc>>,
        successor: Option<String>,
    },

    /// The per-version rate limit was exceeded for this client.
    #[error("rate limit of {limit} requests per minute exceeded for API version '{version}'")]
    RateLimited {
        version: String,
        limit: u32,
        retry_after: Duration,
    },

    #[error("invalid API version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("API version '{version}' is already registered")]
    DuplicateVersion { version: String },

    #[error("invalid version status '{value}'")]
    InvalidStatus { value: String },

    #[error("invalid date '{value}'")]
    InvalidDate { value: String },

    #[error("invalid version pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A failure raised by a route handler.
///
/// The version engine turns it into an error response that still carries the
/// version headers of the resolved version.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    status: StatusCode,
    message: String,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

impl VersioningError {
    /// Default HTTP status for this error.
    ///
    /// Sunset rejections use 410 here; the configured sunset status code
    /// takes precedence when building the actual response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::VersionSunset { .. } => StatusCode::GONE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidVersion { .. }
            | Self::InvalidStatus { .. }
            | Self::InvalidDate { .. }
            | Self::InvalidPattern { .. } => StatusCode::BAD_REQUEST,
            Self::DuplicateVersion { .. } => StatusCode::CONFLICT,
        }
    }

    /// Name of the version this error is about, when one was resolved.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::VersionSunset { version, .. }
            | Self::RateLimited { version, .. }
            | Self::InvalidVersion { version, .. }
            | Self::DuplicateVersion { version } => Some(version),
            _ => None,
        }
    }
}
