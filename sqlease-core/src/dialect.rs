//! Dialect-specific SQL for the lock table.
//!
//! Every statement takes its arguments in the same positional order on all
//! dialects, so the store can bind them without knowing the dialect:
//!
//! | statement | parameters |
//! |-----------|------------|
//! | init      | key |
//! | acquire   | interval, token, key, token |
//! | release   | key, token |
//! | extend    | interval, key, token |

use std::time::Duration;

use crate::error::LockError;
use crate::types::Dialect;

/// Maps a lease duration to the value bound as the `interval` parameter.
pub type IntervalMaker = fn(Duration) -> String;

/// The complete set of statements for one dialect and table name.
#[derive(Debug, Clone)]
pub struct QuerySet {
    pub dialect: Dialect,
    pub create_table: String,
    pub drop_table: String,
    pub init_lock: String,
    pub acquire_lock: String,
    pub release_lock: String,
    pub extend_lock: String,
    interval_maker: IntervalMaker,
}

impl QuerySet {
    /// Builds the statements for `table_name`.
    /// The table name must already be validated; it is spliced into the SQL as is.
    pub fn new(dialect: Dialect, table_name: &str) -> Result<Self, LockError> {
        let t = table_name;
        match dialect {
            Dialect::Postgres | Dialect::Pgx => Ok(Self {
                dialect,
                create_table: format!(
                    r#"CREATE TABLE IF NOT EXISTS "{t}" (lock_key varchar(40) PRIMARY KEY, token uuid, expire_at timestamp);"#
                ),
                drop_table: format!(r#"DROP TABLE IF EXISTS "{t}";"#),
                init_lock: format!(
                    r#"INSERT INTO "{t}" (lock_key) VALUES ($1) ON CONFLICT (lock_key) DO NOTHING;"#
                ),
                acquire_lock: format!(
                    r#"UPDATE "{t}" SET expire_at = NOW() + $1::interval, token = $2 WHERE lock_key = $3 AND ((expire_at IS NULL OR expire_at < NOW()) OR token = $4);"#
                ),
                release_lock: format!(
                    r#"UPDATE "{t}" SET expire_at = NULL WHERE lock_key = $1 AND token = $2 AND expire_at >= NOW();"#
                ),
                extend_lock: format!(
                    r#"UPDATE "{t}" SET expire_at = NOW() + $1::interval WHERE lock_key = $2 AND token = $3 AND expire_at >= NOW();"#
                ),
                interval_maker: postgres_interval,
            }),
            Dialect::MySql => Ok(Self {
                dialect,
                create_table: format!(
                    "CREATE TABLE IF NOT EXISTS `{t}` (lock_key VARCHAR(40) PRIMARY KEY, token VARCHAR(36), expire_at BIGINT);"
                ),
                drop_table: format!("DROP TABLE IF EXISTS `{t}`;"),
                init_lock: format!("INSERT IGNORE `{t}` (lock_key) VALUES (?);"),
                acquire_lock: format!(
                    "UPDATE `{t}` SET expire_at = {MYSQL_EXPIRE_AT}, token = ? WHERE lock_key = ? AND ((expire_at IS NULL OR expire_at < {MYSQL_NOW}) OR token = ?);"
                ),
                release_lock: format!(
                    "UPDATE `{t}` SET expire_at = NULL WHERE lock_key = ? AND token = ? AND expire_at >= {MYSQL_NOW};"
                ),
                extend_lock: format!(
                    "UPDATE `{t}` SET expire_at = {MYSQL_EXPIRE_AT} WHERE lock_key = ? AND token = ? AND expire_at >= {MYSQL_NOW};"
                ),
                interval_maker: microseconds,
            }),
            Dialect::Sqlite => Ok(Self {
                dialect,
                create_table: format!(
                    r#"CREATE TABLE IF NOT EXISTS "{t}" (lock_key VARCHAR(40) PRIMARY KEY, token VARCHAR(36), expire_at BIGINT);"#
                ),
                drop_table: format!(r#"DROP TABLE IF EXISTS "{t}";"#),
                init_lock: format!(r#"INSERT OR IGNORE INTO "{t}" (lock_key) VALUES (?1);"#),
                acquire_lock: format!(
                    r#"UPDATE "{t}" SET expire_at = {SQLITE_NOW} + CAST(?1 AS INTEGER), token = ?2 WHERE lock_key = ?3 AND ((expire_at IS NULL OR expire_at < {SQLITE_NOW}) OR token = ?4);"#
                ),
                release_lock: format!(
                    r#"UPDATE "{t}" SET expire_at = NULL WHERE lock_key = ?1 AND token = ?2 AND expire_at >= {SQLITE_NOW};"#
                ),
                extend_lock: format!(
                    r#"UPDATE "{t}" SET expire_at = {SQLITE_NOW} + CAST(?1 AS INTEGER) WHERE lock_key = ?2 AND token = ?3 AND expire_at >= {SQLITE_NOW};"#
                ),
                interval_maker: microseconds,
            }),
            Dialect::MsSql => Err(LockError::UnsupportedDialect(dialect.to_string())),
        }
    }

    /// Renders `ttl` in the form the acquire and extend statements expect.
    pub fn interval(&self, ttl: Duration) -> String {
        (self.interval_maker)(ttl)
    }
}

// MySQL keeps expire_at as BIGINT in units of 100µs (UNIX_TIMESTAMP with 4 fractional digits).
const MYSQL_NOW: &str = "UNIX_TIMESTAMP(CURTIME(4))*10000";
const MYSQL_EXPIRE_AT: &str = "UNIX_TIMESTAMP(DATE_ADD(CURTIME(4), INTERVAL ? MICROSECOND))*10000";

// SQLite keeps expire_at as microseconds since the Unix epoch.
const SQLITE_NOW: &str = "CAST((julianday('now') - 2440587.5) * 86400000000 AS INTEGER)";

// Every dialect stores or computes the offset as a signed 64-bit integer.
fn micros_saturating(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX)
}

fn postgres_interval(ttl: Duration) -> String {
    format!("{} microseconds", micros_saturating(ttl))
}

fn microseconds(ttl: Duration) -> String {
    micros_saturating(ttl).to_string()
}
