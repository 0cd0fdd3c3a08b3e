//! The closed set of logical tables
//!
//! Statement text is only ever generated from a `Table`, never from a
//! caller-supplied string, so there is no table name to validate at runtime.

/// Logical tables in the auth database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Sessions,
    Cache,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Sessions, Table::Cache];

    pub fn name(self) -> &'static str {
        match self {
            Table::Sessions => "sessions",
            Table::Cache => "cache",
        }
    }

    pub(crate) fn create_statement(self) -> &'static str {
        match self {
            Table::Sessions => {
                "CREATE TABLE IF NOT EXISTS sessions (
                    account_id              TEXT PRIMARY KEY,
                    access_token            TEXT NOT NULL,
                    refresh_token           TEXT NOT NULL,
                    access_token_expires_at INTEGER NOT NULL,
                    created_at              INTEGER NOT NULL,
                    updated_at              INTEGER NOT NULL
                )"
            }
            Table::Cache => {
                "CREATE TABLE IF NOT EXISTS cache (
                    account_id   TEXT NOT NULL,
                    resource     TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    payload      BLOB NOT NULL,
                    updated_at   INTEGER NOT NULL,
                    PRIMARY KEY (account_id, resource)
                )"
            }
        }
    }

    pub(crate) fn index_statements(self) -> &'static [&'static str] {
        match self {
            Table::Sessions => &[
                "CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(access_token_expires_at)",
            ],
            Table::Cache => &["CREATE INDEX IF NOT EXISTS idx_cache_account ON cache(account_id)"],
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
