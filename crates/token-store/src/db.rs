//! SQLite database handle
//!
//! Opens the auth database with the pragmas the concurrency model depends on:
//! WAL journaling so readers never wait on the writer, `synchronous = NORMAL`,
//! and a busy timeout so a write that collides with another process (backup,
//! stats script) waits a bounded time and then fails instead of hanging.

use std::path::Path;
use std::time::Duration;

use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use tracing::info;

use crate::error::{Error, Result};
use crate::statements::StatementRegistry;
use crate::table::Table;

/// Tuning knobs for opening the database.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// How long a write waits for a competing lock before failing
    pub busy_timeout: Duration,
    /// Connections in the read-only pool
    pub max_readers: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_readers: 4,
        }
    }
}

/// A value bound to a generated statement placeholder.
#[derive(Debug, Clone)]
pub(crate) enum SqlValue {
    Text(String),
    Integer(i64),
    Blob(Vec<u8>),
}

/// Open auth database: one writer connection, a pool of read-only readers and
/// the statement registry for this file.
pub struct Database {
    name: String,
    writer: SqlitePool,
    reader: SqlitePool,
    statements: StatementRegistry,
}

impl Database {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path, options: DatabaseOptions) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?
            .to_owned();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(database = %name, path = %path.display(), "initializing database");

        let base = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout)
            .statement_cache_capacity(64);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base.clone().create_if_missing(true))
            .await?;

        ensure_schema(&writer).await?;

        // Readers open after the schema exists so read-only mode never has to create the file
        let reader = SqlitePoolOptions::new()
            .max_connections(options.max_readers.max(1))
            .connect_with(base.read_only(true))
            .await?;

        info!(database = %name, "database initialized");
        Ok(Self {
            statements: StatementRegistry::new(name.clone()),
            name,
            writer,
            reader,
        })
    }

    /// Store identity used in statement fingerprints and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statements(&self) -> &StatementRegistry {
        &self.statements
    }

    /// Current journal mode as reported by SQLite (`"wal"` once opened).
    pub async fn journal_mode(&self) -> Result<String> {
        let mode = sqlx::query_scalar::<_, String>("PRAGMA journal_mode")
            .fetch_one(&self.writer)
            .await?;
        Ok(mode)
    }

    pub(crate) fn reader(&self) -> &SqlitePool {
        &self.reader
    }

    /// Run one write statement on the writer connection.
    pub(crate) async fn execute(&self, sql: &str, values: Vec<SqlValue>) -> Result<u64> {
        let result = bind_values(sqlx::query(sql), values)
            .execute(&self.writer)
            .await?;
        Ok(result.rows_affected())
    }

    /// Close both pools, waiting for in-flight statements to finish.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
        info!(database = %self.name, "database closed");
    }
}

async fn ensure_schema(writer: &SqlitePool) -> Result<()> {
    for table in Table::ALL {
        sqlx::query(table.create_statement()).execute(writer).await?;
        for index in table.index_statements() {
            sqlx::query(index).execute(writer).await?;
        }
    }
    Ok(())
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Integer(v) => query.bind(v),
            SqlValue::Blob(v) => query.bind(v),
        };
    }
    query
}
