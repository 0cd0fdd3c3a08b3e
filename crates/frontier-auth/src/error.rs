//! Error types for OAuth operations

/// Errors from talking to the Frontier authorization server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Refresh token or authorization code rejected outright (401/403)
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
