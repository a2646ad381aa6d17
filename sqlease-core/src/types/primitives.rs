use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::LockError;

/// Default name of the table that stores distributed locks.
pub const DEFAULT_TABLE_NAME: &str = "distributed_locks";

/// Upper bound (in bytes) for a lock key, matching the `lock_key` column width.
pub const MAX_KEY_LEN: usize = 40;

/// Upper bound (in bytes) for a custom table name.
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// SQL dialects known to the toolkit.
/// Not every dialect is supported by the lock store (see [`crate::dialect::QuerySet`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "sqlite3")]
    Sqlite,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgres")]
    Postgres,
    /// PostgreSQL reached through the pgx driver; same SQL as [`Dialect::Postgres`].
    #[serde(rename = "pgx")]
    Pgx,
    #[serde(rename = "mssql")]
    MsSql,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Sqlite,
        Dialect::MySql,
        Dialect::Postgres,
        Dialect::Pgx,
        Dialect::MsSql,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite3",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Pgx => "pgx",
            Dialect::MsSql => "mssql",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LockError::UnsupportedDialect(s.to_string()))
    }
}

/// Checks that a lock key fits the `lock_key` column.
pub fn validate_key(key: &str) -> Result<(), LockError> {
    if key.is_empty() {
        return Err(LockError::InvalidKey("lock key cannot be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(LockError::InvalidKey(format!(
            "lock key cannot be longer than {} bytes, got {}",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    Ok(())
}

/// Table names are spliced into SQL text, so only plain identifiers are accepted.
pub fn validate_table_name(name: &str) -> Result<(), LockError> {
    if name.is_empty() || name.len() > MAX_TABLE_NAME_LEN {
        return Err(LockError::InvalidTableName(format!(
            "table name must be 1..={} bytes long",
            MAX_TABLE_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LockError::InvalidTableName(format!(
            "'{}' is not a plain SQL identifier",
            name
        )));
    }
    Ok(())
}
