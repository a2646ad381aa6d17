//! Storage seams: anything that can run a parameterized statement, and
//! anything that can open a transaction.

use async_trait::async_trait;

use crate::error::{DbError, LockError};

/// Runs a parameterized statement and reports the number of affected rows.
///
/// Implemented by plain connections and by open transactions alike, so lock
/// operations can run inside the caller's own unit of work.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DbError>;
}

/// An open transaction. Dropping it without calling [`Transaction::commit`]
/// rolls it back.
#[async_trait]
pub trait Transaction: SqlExecutor {
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// A database handle that can execute statements directly or open transactions.
#[async_trait]
pub trait Database: SqlExecutor {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;
}

/// Commits `tx` if `result` is `Ok`, rolls it back otherwise.
///
/// The operation's own error wins over a rollback failure.
pub async fn finish_tx<T>(
    tx: Box<dyn Transaction>,
    result: Result<T, LockError>,
) -> Result<T, LockError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| LockError::database("commit transaction", e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "failed to roll back transaction");
            }
            Err(err)
        }
    }
}
