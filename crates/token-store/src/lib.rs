//! Durable session and response-cache storage
//!
//! One SQLite file in WAL mode holds two logical tables:
//! - `sessions`: one row per account with its upstream access/refresh tokens
//! - `cache`: one row per (account, resource) with the last upstream payload
//!
//! Writes are single-row atomic statements (`INSERT OR REPLACE`, `UPDATE`,
//! `DELETE`) funnelled through a one-connection writer pool; reads use a
//! separate read-only pool. Concurrent writers from the request path and the
//! refresh scheduler rely on nothing more than that per-row atomicity.

pub mod cache;
pub mod db;
pub mod error;
pub mod sessions;
pub mod statements;
pub mod table;

pub use cache::{CacheEntry, CacheStore, CachedPayload, Freshness};
pub use db::{Database, DatabaseOptions};
pub use error::{Error, Result};
pub use sessions::{Session, SessionStore, SessionUpdate};
pub use statements::StatementRegistry;
pub use table::Table;
