//! Error types for a refresh pass

/// Errors that abort a whole pass.
///
/// Per-session failures never surface here; they are counted in the report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session scan failed: {0}")]
    Scan(#[from] token_store::Error),
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, Error>;
