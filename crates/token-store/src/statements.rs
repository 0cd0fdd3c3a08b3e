//! Per-database registry of generated write statements
//!
//! Every distinct write shape (table + set of columns) is rendered to SQL once
//! and the same `Arc<str>` is handed out on every later write with that shape.
//! sqlx keeps prepared statements per connection keyed by statement text, so
//! reusing identical text means each shape is prepared once per connection
//! instead of once per write.
//!
//! Shapes are keyed by a fingerprint of `(store name, statement text)` and the
//! registry is owned by one `Database`; two databases never share entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::table::Table;

/// Cache of generated statements for one store.
#[derive(Debug)]
pub struct StatementRegistry {
    store: String,
    compiled: Mutex<HashMap<String, Arc<str>>>,
}

impl StatementRegistry {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// `INSERT OR REPLACE INTO <table> (<columns>) VALUES (?1, ?2, ...)`
    pub(crate) fn insert_or_replace(&self, table: Table, columns: &[&str]) -> Arc<str> {
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table.name(),
            columns.join(", "),
            placeholders
        );
        self.intern(sql)
    }

    /// `UPDATE <table> SET a = ?1, b = ?2 WHERE k = ?3 ...`
    ///
    /// Bind the SET values first, then the key values, in the given order.
    pub(crate) fn update(&self, table: Table, columns: &[&str], keys: &[&str]) -> Arc<str> {
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let condition = keys
            .iter()
            .enumerate()
            .map(|(i, key)| format!("{key} = ?{}", columns.len() + i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("UPDATE {} SET {assignments} WHERE {condition}", table.name());
        self.intern(sql)
    }

    /// Number of distinct shapes seen so far.
    pub fn len(&self) -> usize {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fingerprint(&self, sql: &str) -> String {
        let digest = Sha256::digest(format!("{}/{sql}", self.store).as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    fn intern(&self, sql: String) -> Arc<str> {
        let key = self.fingerprint(&sql);
        let mut compiled = self
            .compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        compiled
            .entry(key)
            .or_insert_with(|| {
                debug!(store = %self.store, sql = %sql, "new statement shape");
                Arc::from(sql)
            })
            .clone()
    }
}
