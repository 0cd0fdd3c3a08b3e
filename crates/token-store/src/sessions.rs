//! Token Store: one session row per account
//!
//! The store is the only owner of refresh-token state. Sign-in creates rows
//! with whole-record upserts, the refresh scheduler rewrites token fields with
//! `update_fields`, and sign-out deletes. Every call is one atomic statement,
//! so concurrent writers for the same account race benignly (last write wins).

use std::sync::Arc;

use common::{Clock, Secret};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::db::{Database, SqlValue};
use crate::error::Result;
use crate::table::Table;

const COLUMNS: [&str; 6] = [
    "account_id",
    "access_token",
    "refresh_token",
    "access_token_expires_at",
    "created_at",
    "updated_at",
];

/// An account's upstream credentials. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub account_id: String,
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub access_token_expires_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    /// A fresh session as written at the end of a successful sign-in.
    pub fn new(
        account_id: impl Into<String>,
        access_token: impl Into<Secret<String>>,
        refresh_token: impl Into<Secret<String>>,
        access_token_expires_at: i64,
        now_millis: i64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            access_token_expires_at,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            account_id: row.try_get("account_id")?,
            access_token: Secret::new(row.try_get("access_token")?),
            refresh_token: Secret::new(row.try_get("refresh_token")?),
            access_token_expires_at: row.try_get("access_token_expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Partial update of a session's token fields.
///
/// `updated_at` is always written; only the `Some` fields are touched. Each
/// distinct combination of fields is its own statement shape.
#[derive(Debug, Default, Clone)]
pub struct SessionUpdate {
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub access_token_expires_at: Option<i64>,
}

impl SessionUpdate {
    /// The update the refresh scheduler writes after a successful refresh.
    pub fn refreshed(
        access_token: impl Into<Secret<String>>,
        refresh_token: impl Into<Secret<String>>,
        access_token_expires_at: i64,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            access_token_expires_at: Some(access_token_expires_at),
        }
    }

    fn into_columns(self, now_millis: i64) -> (Vec<&'static str>, Vec<SqlValue>) {
        let mut columns = Vec::with_capacity(4);
        let mut values = Vec::with_capacity(4);
        if let Some(token) = self.access_token {
            columns.push("access_token");
            values.push(SqlValue::Text(token.expose().clone()));
        }
        if let Some(token) = self.refresh_token {
            columns.push("refresh_token");
            values.push(SqlValue::Text(token.expose().clone()));
        }
        if let Some(expires) = self.access_token_expires_at {
            columns.push("access_token_expires_at");
            values.push(SqlValue::Integer(expires));
        }
        columns.push("updated_at");
        values.push(SqlValue::Integer(now_millis));
        (columns, values)
    }
}

/// Session persistence over the shared `Database`.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Insert or replace the whole record for `session.account_id`.
    pub async fn upsert(&self, session: &Session) -> Result<()> {
        let sql = self
            .db
            .statements()
            .insert_or_replace(Table::Sessions, &COLUMNS);
        let values = vec![
            SqlValue::Text(session.account_id.clone()),
            SqlValue::Text(session.access_token.expose().clone()),
            SqlValue::Text(session.refresh_token.expose().clone()),
            SqlValue::Integer(session.access_token_expires_at),
            SqlValue::Integer(session.created_at),
            SqlValue::Integer(session.updated_at),
        ];
        self.db.execute(&sql, values).await?;
        debug!(account_id = %session.account_id, "session upserted");
        Ok(())
    }

    pub async fn get(&self, account_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(self.db.reader())
            .await?;
        row.as_ref().map(Session::from_row).transpose()
    }

    /// Current access token only; the proxy's hot path.
    pub async fn access_token(&self, account_id: &str) -> Result<Option<Secret<String>>> {
        let token: Option<String> =
            sqlx::query_scalar("SELECT access_token FROM sessions WHERE account_id = ?1")
                .bind(account_id)
                .fetch_optional(self.db.reader())
                .await?;
        Ok(token.map(Secret::new))
    }

    /// Update the given fields of an existing session.
    ///
    /// Returns `false` when no session exists for the account; nothing is
    /// created in that case.
    pub async fn update_fields(&self, account_id: &str, update: SessionUpdate) -> Result<bool> {
        let (columns, mut values) = update.into_columns(self.clock.now_millis());
        let sql = self
            .db
            .statements()
            .update(Table::Sessions, &columns, &["account_id"]);
        values.push(SqlValue::Text(account_id.to_owned()));
        let updated = self.db.execute(&sql, values).await? > 0;
        debug!(account_id, fields = ?columns, updated, "session fields updated");
        Ok(updated)
    }

    /// Returns whether a session was removed.
    pub async fn delete(&self, account_id: &str) -> Result<bool> {
        let removed = self
            .db
            .execute(
                "DELETE FROM sessions WHERE account_id = ?1",
                vec![SqlValue::Text(account_id.to_owned())],
            )
            .await?
            > 0;
        debug!(account_id, removed, "session deleted");
        Ok(removed)
    }

    /// Sessions whose access token expires at or before `cutoff_millis`,
    /// soonest first.
    pub async fn expiring_before(&self, cutoff_millis: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE access_token_expires_at <= ?1 \
             ORDER BY access_token_expires_at ASC",
        )
        .bind(cutoff_millis)
        .fetch_all(self.db.reader())
        .await?;
        rows.iter().map(Session::from_row).collect()
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.db.reader())
            .await?;
        Ok(count as u64)
    }
}
