//! Error types for Session Gate

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for Session Gate
pub type Result<T> = std::result::Result<T, Error>;

/// Session Gate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The identity check could not be completed (provider or transport fault).
    /// Distinct from "no session".
    #[error("Session resolution failed: {0}")]
    Resolution(String),

    /// The one-time authorization code could not be exchanged for a session
    #[error("Code exchange failed: {0}")]
    Exchange(String),

    /// No credential available; raised before any network call is attempted
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Non-success response from the API
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status returned by the API
        status: StatusCode,
        /// Server-provided message, or a generic failure marker
        message: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an API error from a status and message
    pub fn api(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether this is an authorization failure reported by the API
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    /// Whether this error means the caller is not signed in (as opposed to a fault)
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Exchange(_)) || self.is_unauthorized()
    }
}
