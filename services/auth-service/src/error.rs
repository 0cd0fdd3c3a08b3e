//! HTTP-facing error taxonomy
//!
//! Every handler failure is one of four kinds with a fixed wire shape. The
//! 500 body never includes internals on its own: `IntoResponse` parks the
//! error chain in a response extension and the default-headers middleware
//! adds it as `stack` only outside production.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

/// Uniform message for every unauthorized outcome.
pub const UNAUTHORIZED_MESSAGE: &str = "Not signed in";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing, malformed, tampered or expired credential, or no stored
    /// access token. The cause is for logs only.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unsupported resource: {0}")]
    NotSupported(String),

    /// Non-success from the Frontier API, or no usable response at all
    /// (502/504).
    #[error("upstream request failed with status {status}")]
    Upstream { status: StatusCode },

    #[error("internal error: {message}")]
    Internal { message: String, stack: String },
}

/// Error chain of a 500, attached to the response for the middleware.
#[derive(Debug, Clone)]
pub struct InternalFault {
    pub message: String,
    pub stack: String,
}

impl ApiError {
    pub fn unauthorized(cause: impl Into<String>) -> Self {
        ApiError::Unauthorized(cause.into())
    }

    /// Wrap any error, keeping its `source()` chain for development builds.
    pub fn internal(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = format!("{err:?}");
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\ncaused by: {cause}"));
            source = cause.source();
        }
        ApiError::Internal {
            message: err.to_string(),
            stack,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotSupported(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { status } => *status,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<token_store::Error> for ApiError {
    fn from(err: token_store::Error) -> Self {
        ApiError::internal(&err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthorized(cause) => {
                debug!(cause, "request unauthorized");
                let body = serde_json::json!({
                    "error": "Unauthorized",
                    "message": UNAUTHORIZED_MESSAGE,
                });
                (status, axum::Json(body)).into_response()
            }
            ApiError::NotSupported(_) => {
                let body = serde_json::json!({ "error": "Unsupported CAPI endpoint" });
                (status, axum::Json(body)).into_response()
            }
            ApiError::Upstream { status } => {
                let body = serde_json::json!({
                    "error": "Frontier API request failed",
                    "status": status.as_u16(),
                });
                (status, axum::Json(body)).into_response()
            }
            ApiError::Internal { message, stack } => {
                error!(error = %message, "internal error");
                let body = serde_json::json!({
                    "error": "Internal server error",
                    "message": message,
                });
                let mut response = (status, axum::Json(body)).into_response();
                response
                    .extensions_mut()
                    .insert(InternalFault { message, stack });
                response
            }
        }
    }
}
