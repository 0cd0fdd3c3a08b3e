//! Error types for store operations

/// Errors from the session and cache stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid store path: {0}")]
    InvalidPath(String),
}

impl Error {
    /// SQLite reported `SQLITE_BUSY`: the busy timeout elapsed while another
    /// connection (e.g. an offline backup) held the write lock.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| matches!(code.as_ref(), "5" | "261" | "517"))
            }
            _ => false,
        }
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
