//! Error types for the authentication gate

use std::io;

use thiserror::Error;

/// Result type alias for authgate
pub type Result<T> = std::result::Result<T, Error>;

/// Authentication gate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (file, env, CLI)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider metadata could not be fetched or decoded. Startup-fatal:
    /// the gate never serves traffic with an unvalidated provider.
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// Provider metadata is missing a required field. Startup-fatal.
    #[error("Invalid OIDC provider configuration: {0}")]
    InvalidConfiguration(String),

    /// Session store failure, surfaced to the caller as 500
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// Compare-and-swap version mismatch on a session write. Another
    /// request updated the session first; the caller re-reads.
    #[error("Session was modified concurrently")]
    SessionConflict,

    /// Refresh-token exchange failed. Recovered locally: the session is
    /// cleared and the caller is routed back through login.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Callback state parameter missing, consumed, or mismatched
    #[error("Login flow state mismatch")]
    StateMismatch,

    /// The provider redirected back with an error parameter
    #[error("Login callback error: {0}")]
    CallbackError(String),

    /// Authorization-code exchange failed; the login attempt is abandoned
    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    /// Upstream service unreachable or returned a transport-level failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborts startup rather than a single request.
    #[must_use]
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Discovery(_) | Self::InvalidConfiguration(_)
        )
    }
}
