//! Proactive upstream token renewal
//!
//! The scheduler scans the Token Store for sessions whose access token expires
//! inside the refresh horizon and trades each stored refresh token for a new
//! pair. It runs once at startup and then on a fixed interval, independently
//! of request traffic. Each session is refreshed on its own: a failure is
//! logged and the pass moves on.

pub mod error;
pub mod scheduler;

pub use error::{Error, Result};
pub use scheduler::{RefreshReport, RefreshScheduler, spawn_refresh_task};
