//! Lock store: the three atomic state transitions of a lock row.
//!
//! Each transition is a single conditional `UPDATE` whose affected-row count
//! tells whether the transition happened. The database evaluates `now()`, so
//! participants never compare their own clocks.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::dialect::QuerySet;
use crate::error::LockError;
use crate::infrastructure::SqlExecutor;
use crate::types::{validate_key, validate_table_name, Dialect, Lease, DEFAULT_TABLE_NAME};

/// Identifier of the migration that creates the lock table.
pub const CREATE_TABLE_MIGRATION_ID: &str = "distrlock_00001_create_table";

/// A schema migration that external migration tooling can apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub id: &'static str,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

/// Manages distributed locks kept in one table of a SQL database.
///
/// Cheap to clone; clones share the generated statements.
#[derive(Debug, Clone)]
pub struct LockStore {
    table_name: Arc<str>,
    queries: Arc<QuerySet>,
}

impl LockStore {
    /// A store on [`DEFAULT_TABLE_NAME`].
    pub fn new(dialect: Dialect) -> Result<Self, LockError> {
        Self::with_table_name(dialect, DEFAULT_TABLE_NAME)
    }

    pub fn with_table_name(dialect: Dialect, table_name: &str) -> Result<Self, LockError> {
        validate_table_name(table_name)?;
        let queries = QuerySet::new(dialect, table_name)?;
        Ok(Self {
            table_name: Arc::from(table_name),
            queries: Arc::new(queries),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn dialect(&self) -> Dialect {
        self.queries.dialect
    }

    pub fn queries(&self) -> &QuerySet {
        &self.queries
    }

    pub fn create_table_sql(&self) -> &str {
        &self.queries.create_table
    }

    pub fn drop_table_sql(&self) -> &str {
        &self.queries.drop_table
    }

    /// Migrations that must be applied before creating new locks.
    pub fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: CREATE_TABLE_MIGRATION_ID,
            up: vec![self.queries.create_table.clone()],
            down: vec![self.queries.drop_table.clone()],
        }]
    }

    /// Creates the lock row for `key` if it does not exist yet and returns an
    /// initialized (but not acquired) lease handle.
    pub async fn new_lock<E>(&self, executor: &E, key: &str) -> Result<Lease, LockError>
    where
        E: SqlExecutor + ?Sized,
    {
        validate_key(key)?;
        executor
            .execute(&self.queries.init_lock, &[key])
            .await
            .map_err(|e| LockError::database(format!("init lock with key {}", key), e))?;
        Ok(Lease::new(key.to_string()))
    }

    /// Acquires the lock under a fresh random token.
    pub async fn acquire<E>(&self, executor: &E, lease: &mut Lease, ttl: Duration) -> Result<(), LockError>
    where
        E: SqlExecutor + ?Sized,
    {
        self.acquire_with_static_token(executor, lease, Uuid::new_v4().to_string(), ttl)
            .await
    }

    /// Acquires the lock under a caller-chosen token.
    ///
    /// A lease still held by the same token is taken again and its expiry
    /// pushed forward. Two use cases:
    ///  1. Repeatedly acquiring the same lock to keep other processes out,
    ///     e.g. blocking old workers before starting upgraded ones.
    ///  2. Letting several cooperating processes hold the same lock.
    ///
    /// Prefer [`LockStore::acquire`] unless one of these applies.
    ///
    /// `lease` records the token as soon as the statement succeeds. When
    /// `executor` is a transaction, the lease is only valid once it commits.
    pub async fn acquire_with_static_token<E>(
        &self,
        executor: &E,
        lease: &mut Lease,
        token: impl Into<String>,
        ttl: Duration,
    ) -> Result<(), LockError>
    where
        E: SqlExecutor + ?Sized,
    {
        let token = token.into();
        let interval = self.queries.interval(ttl);
        exec_and_check_affected(
            executor,
            &self.queries.acquire_lock,
            &[interval.as_str(), token.as_str(), lease.key(), token.as_str()],
            LockError::AlreadyAcquired,
            "acquire",
            lease.key(),
        )
        .await?;
        lease.set_acquired(token, ttl);
        Ok(())
    }

    /// Releases the lock held by the lease's token.
    pub async fn release<E>(&self, executor: &E, lease: &Lease) -> Result<(), LockError>
    where
        E: SqlExecutor + ?Sized,
    {
        if !lease.is_acquired() {
            return Err(LockError::AlreadyReleased);
        }
        exec_and_check_affected(
            executor,
            &self.queries.release_lock,
            &[lease.key(), lease.token()],
            LockError::AlreadyReleased,
            "release",
            lease.key(),
        )
        .await
    }

    /// Pushes the expiry of a held lease to `now + ttl`.
    ///
    /// [`LockError::AlreadyReleased`] means the lease is gone and must be
    /// acquired again.
    pub async fn extend<E>(&self, executor: &E, lease: &Lease) -> Result<(), LockError>
    where
        E: SqlExecutor + ?Sized,
    {
        if !lease.is_acquired() {
            return Err(LockError::AlreadyReleased);
        }
        let interval = self.queries.interval(lease.ttl());
        exec_and_check_affected(
            executor,
            &self.queries.extend_lock,
            &[interval.as_str(), lease.key(), lease.token()],
            LockError::AlreadyReleased,
            "extend",
            lease.key(),
        )
        .await
    }
}

async fn exec_and_check_affected<E>(
    executor: &E,
    sql: &str,
    params: &[&str],
    on_no_rows: LockError,
    op: &str,
    key: &str,
) -> Result<(), LockError>
where
    E: SqlExecutor + ?Sized,
{
    let affected = executor
        .execute(sql, params)
        .await
        .map_err(|e| LockError::database(format!("{} lock with key {}", op, key), e))?;
    if affected == 0 {
        return Err(on_no_rows);
    }
    Ok(())
}
