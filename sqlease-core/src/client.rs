//! Ready-to-use helpers for the default lock table.
//! To use a custom table name, build a [`LockStore`] directly.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::coordinator::ExclusiveOptions;
use crate::error::LockError;
use crate::infrastructure::Database;
use crate::store::LockStore;
use crate::types::Dialect;

/// SQL creating the default lock table for `dialect`.
pub fn create_table_sql(dialect: Dialect) -> Result<String, LockError> {
    Ok(LockStore::new(dialect)?.create_table_sql().to_string())
}

/// SQL dropping the default lock table for `dialect`.
pub fn drop_table_sql(dialect: Dialect) -> Result<String, LockError> {
    Ok(LockStore::new(dialect)?.drop_table_sql().to_string())
}

/// Runs `work` while holding the lock for `key` in the default table.
///
/// Creates the store, initializes the lock row and delegates to
/// [`LockStore::do_exclusively`].
pub async fn do_exclusively<D, F, Fut, T, E>(
    db: Arc<D>,
    dialect: Dialect,
    key: &str,
    ctx: &CancellationToken,
    options: ExclusiveOptions,
    work: F,
) -> Result<T, E>
where
    D: Database + ?Sized + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    let store = LockStore::new(dialect)?;
    let mut lease = store.new_lock(db.as_ref(), key).await?;
    store
        .do_exclusively(db, &mut lease, ctx, options, work)
        .await
}
