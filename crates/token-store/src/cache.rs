//! Cache Store: last upstream response per (account, resource)
//!
//! The store keeps whatever the proxy last fetched successfully. It has no
//! opinion on staleness: callers pass a `Freshness` policy and entries the
//! policy rejects read as a miss.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use sqlx::Row;
use tracing::debug;

use crate::db::{Database, SqlValue};
use crate::error::Result;
use crate::table::Table;

const COLUMNS: [&str; 5] = [
    "account_id",
    "resource",
    "content_type",
    "payload",
    "updated_at",
];

/// Opaque response body plus the content type it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl CachedPayload {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// A stored entry with its write time (unix millis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub account_id: String,
    pub resource: String,
    pub payload: CachedPayload,
    pub updated_at: i64,
}

/// Caller-side policy deciding whether an entry may still be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve until overwritten or deleted
    Always,
    /// Serve while younger than the given age
    MaxAge(Duration),
}

impl Freshness {
    pub fn is_fresh(&self, updated_at: i64, now_millis: i64) -> bool {
        match self {
            Freshness::Always => true,
            Freshness::MaxAge(max_age) => now_millis - updated_at < max_age.as_millis() as i64,
        }
    }
}

/// Cached upstream responses over the shared `Database`.
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Payload for the pair, or `None` if absent or stale under `freshness`.
    pub async fn get(
        &self,
        account_id: &str,
        resource: &str,
        freshness: Freshness,
    ) -> Result<Option<CachedPayload>> {
        let now = self.clock.now_millis();
        Ok(self
            .entry(account_id, resource)
            .await?
            .filter(|entry| freshness.is_fresh(entry.updated_at, now))
            .map(|entry| entry.payload))
    }

    /// The raw entry regardless of age.
    pub async fn entry(&self, account_id: &str, resource: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT content_type, payload, updated_at FROM cache \
             WHERE account_id = ?1 AND resource = ?2",
        )
        .bind(account_id)
        .bind(resource)
        .fetch_optional(self.db.reader())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CacheEntry {
            account_id: account_id.to_owned(),
            resource: resource.to_owned(),
            payload: CachedPayload {
                content_type: row.try_get("content_type")?,
                body: row.try_get("payload")?,
            },
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Insert or replace the entry for the pair.
    pub async fn set(&self, account_id: &str, resource: &str, payload: &CachedPayload) -> Result<()> {
        let sql = self.db.statements().insert_or_replace(Table::Cache, &COLUMNS);
        let values = vec![
            SqlValue::Text(account_id.to_owned()),
            SqlValue::Text(resource.to_owned()),
            SqlValue::Text(payload.content_type.clone()),
            SqlValue::Blob(payload.body.clone()),
            SqlValue::Integer(self.clock.now_millis()),
        ];
        self.db.execute(&sql, values).await?;
        debug!(account_id, resource, bytes = payload.body.len(), "cache entry written");
        Ok(())
    }

    /// Remove every entry for the account in one statement.
    ///
    /// A `set` that commits after this returns is kept; nothing written before
    /// it survives.
    pub async fn delete_all(&self, account_id: &str) -> Result<u64> {
        let removed = self
            .db
            .execute(
                "DELETE FROM cache WHERE account_id = ?1",
                vec![SqlValue::Text(account_id.to_owned())],
            )
            .await?;
        debug!(account_id, removed, "cache entries deleted");
        Ok(removed)
    }

    pub async fn count_for(&self, account_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(self.db.reader())
            .await?;
        Ok(count as u64)
    }
}
