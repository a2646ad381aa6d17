//! SQLite-backed executor and transactional wrapper.
//!
//! Enable with the `sqlite` feature flag (on by default):
//! ```toml
//! sqlease-core = { path = "../sqlease-core", features = ["sqlite"] }
//! ```
//!
//! Every [`SqliteDatabase::begin`] opens its own connection to the database
//! file, so several handles on one file behave like independent processes.
//! An in-memory database (`:memory:`) therefore cannot be used with transactions.

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::DbError;
use crate::infrastructure::{Database, SqlExecutor, Transaction};

/// How long a connection waits on a locked database file before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A SQLite database file shared by every process that coordinates through it.
///
/// Uses WAL mode for concurrent read performance.
pub struct SqliteDatabase {
    path: PathBuf,
    busy_timeout: Duration,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref().to_path_buf();
        let conn = connect(&path, busy_timeout)?;
        Ok(Self {
            path,
            busy_timeout,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs one or more statements without parameters, e.g. generated DDL.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let sql = sql.to_owned();
        run_blocking(self.conn.clone(), move |conn| conn.execute_batch(&sql)).await
    }
}

#[async_trait]
impl SqlExecutor for SqliteDatabase {
    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DbError> {
        execute_owned(self.conn.clone(), sql, params).await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let conn = connect(&path, busy_timeout)?;
            // Take the write lock up front so the conditional update never
            // has to upgrade a read lock mid-transaction.
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(conn)
        })
        .await??;

        Ok(Box::new(SqliteTransaction {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// A transaction on a dedicated connection. Closing the connection without a
/// `COMMIT` makes SQLite roll the transaction back.
pub struct SqliteTransaction {
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl SqlExecutor for SqliteTransaction {
    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DbError> {
        execute_owned(self.conn.clone(), sql, params).await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        run_blocking(self.conn.clone(), |conn| conn.execute_batch("COMMIT")).await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        run_blocking(self.conn.clone(), |conn| conn.execute_batch("ROLLBACK")).await
    }
}

fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

async fn execute_owned(
    conn: Arc<Mutex<Connection>>,
    sql: &str,
    params: &[&str],
) -> Result<u64, DbError> {
    let sql = sql.to_owned();
    let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    run_blocking(conn, move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        Ok(affected as u64)
    })
    .await
}

// rusqlite is synchronous and a busy database blocks for up to the busy
// timeout, so statements run on the blocking pool.
async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<T, DbError> {
        let conn = conn
            .lock()
            .map_err(|_| DbError::from("sqlite connection mutex poisoned"))?;
        Ok(f(&*conn)?)
    })
    .await?
}
