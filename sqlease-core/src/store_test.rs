#[cfg(test)]
mod tests {
    use crate::error::LockError;
    use crate::infrastructure::Database;
    use crate::infrastructure_sqlite::SqliteDatabase;
    use crate::store::{LockStore, CREATE_TABLE_MIGRATION_ID};
    use crate::types::{Dialect, Lease, DEFAULT_TABLE_NAME};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    // =========================================================================
    // Helpers
    // =========================================================================

    const TTL: Duration = Duration::from_secs(30);

    async fn setup() -> (TempDir, PathBuf, LockStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks.db");
        let store = LockStore::new(Dialect::Sqlite).unwrap();
        let db = SqliteDatabase::open(&path).unwrap();
        db.execute_batch(store.create_table_sql()).await.unwrap();
        (dir, path, store)
    }

    /// A separate handle on the same file stands in for another process.
    fn process(path: &Path) -> SqliteDatabase {
        SqliteDatabase::open(path).unwrap()
    }

    fn row_count(path: &Path) -> i64 {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", DEFAULT_TABLE_NAME),
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn expire_at(path: &Path, key: &str) -> Option<i64> {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.query_row(
            &format!("SELECT expire_at FROM {} WHERE lock_key = ?1", DEFAULT_TABLE_NAME),
            [key],
            |row| row.get(0),
        )
        .unwrap()
    }

    // =========================================================================
    // Init
    // =========================================================================

    #[tokio::test]
    async fn test_new_lock_is_idempotent() {
        let (_dir, path, store) = setup().await;
        let db = process(&path);

        let first = store.new_lock(&db, "job-42").await.unwrap();
        let second = store.new_lock(&db, "job-42").await.unwrap();

        assert_eq!(first.key(), "job-42");
        assert!(!first.is_acquired());
        assert_eq!(first, second);
        assert_eq!(row_count(&path), 1);
        assert_eq!(expire_at(&path, "job-42"), None);
    }

    #[tokio::test]
    async fn test_new_lock_rejects_invalid_keys_before_io() {
        let (_dir, path, store) = setup().await;
        let db = process(&path);

        for key in [String::new(), "k".repeat(41)] {
            let err = store.new_lock(&db, &key).await.unwrap_err();
            assert!(matches!(err, LockError::InvalidKey(_)), "{key:?}");
        }
        assert_eq!(row_count(&path), 0);
    }

    #[tokio::test]
    async fn test_new_lock_without_table_reports_database_error() {
        let dir = TempDir::new().unwrap();
        let db = process(&dir.path().join("empty.db"));
        let store = LockStore::new(Dialect::Sqlite).unwrap();

        let err = store.new_lock(&db, "job-42").await.unwrap_err();
        match err {
            LockError::Database { context, .. } => assert_eq!(context, "init lock with key job-42"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // =========================================================================
    // Acquire
    // =========================================================================

    #[tokio::test]
    async fn test_second_holder_is_rejected() {
        let (_dir, path, store) = setup().await;
        let (db_a, db_b) = (process(&path), process(&path));

        let mut a = store.new_lock(&db_a, "job-42").await.unwrap();
        let mut b = store.new_lock(&db_b, "job-42").await.unwrap();

        store.acquire(&db_a, &mut a, TTL).await.unwrap();
        assert!(a.is_acquired());
        assert_eq!(a.ttl(), TTL);

        let err = store.acquire(&db_b, &mut b, TTL).await.unwrap_err();
        assert!(err.is_already_acquired());
        // A failed acquire leaves the handle untouched.
        assert!(!b.is_acquired());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_acquire_has_exactly_one_winner() {
        let (_dir, path, store) = setup().await;
        let (db_a, db_b) = (process(&path), process(&path));
        let mut a = store.new_lock(&db_a, "job-42").await.unwrap();
        let mut b = store.new_lock(&db_b, "job-42").await.unwrap();

        let (res_a, res_b) = tokio::join!(
            store.acquire(&db_a, &mut a, TTL),
            store.acquire(&db_b, &mut b, TTL),
        );

        let winners = [&res_a, &res_b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "a: {res_a:?}, b: {res_b:?}");
        let loser = if res_a.is_err() { res_a } else { res_b };
        assert!(loser.unwrap_err().is_already_acquired());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let (_dir, path, store) = setup().await;
        let (db_a, db_b) = (process(&path), process(&path));
        let mut a = store.new_lock(&db_a, "job-42").await.unwrap();
        let mut b = store.new_lock(&db_b, "job-42").await.unwrap();

        store
            .acquire(&db_a, &mut a, Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        store.acquire(&db_b, &mut b, TTL).await.unwrap();
        assert_ne!(a.token(), b.token());

        // The old holder lost it for good.
        assert!(store.extend(&db_a, &a).await.unwrap_err().is_already_released());
        assert!(store.release(&db_a, &a).await.unwrap_err().is_already_released());
    }

    #[tokio::test]
    async fn test_static_token_reacquires_before_expiry() {
        let (_dir, path, store) = setup().await;
        let (db_a, db_b) = (process(&path), process(&path));
        let mut a = store.new_lock(&db_a, "job-42").await.unwrap();

        for _ in 0..3 {
            store
                .acquire_with_static_token(&db_a, &mut a, "worker-v1", TTL)
                .await
                .unwrap();
        }
        assert_eq!(a.token(), "worker-v1");

        // A cooperating process sharing the token holds it too.
        let mut shared = store.new_lock(&db_b, "job-42").await.unwrap();
        store
            .acquire_with_static_token(&db_b, &mut shared, "worker-v1", TTL)
            .await
            .unwrap();

        // Anybody else is kept out.
        let mut other = store.new_lock(&db_b, "job-42").await.unwrap();
        assert!(store
            .acquire(&db_b, &mut other, TTL)
            .await
            .unwrap_err()
            .is_already_acquired());
    }

    #[tokio::test]
    async fn test_acquire_in_rolled_back_transaction_leaves_lock_free() {
        let (_dir, path, store) = setup().await;
        let db = process(&path);
        let mut a = store.new_lock(&db, "job-42").await.unwrap();

        let tx = db.begin().await.unwrap();
        store.acquire(&*tx, &mut a, TTL).await.unwrap();
        tx.rollback().await.unwrap();

        let mut b = store.new_lock(&db, "job-42").await.unwrap();
        store.acquire(&db, &mut b, TTL).await.unwrap();
    }

    // =========================================================================
    // Release / Extend
    // =========================================================================

    #[tokio::test]
    async fn test_release_is_token_scoped() {
        let (_dir, path, store) = setup().await;
        let db = process(&path);
        let mut a = store.new_lock(&db, "job-42").await.unwrap();
        store.acquire(&db, &mut a, TTL).await.unwrap();

        let impostor = Lease::resume("job-42", "not-the-holder", TTL);
        assert!(store
            .release(&db, &impostor)
            .await
            .unwrap_err()
            .is_already_released());
        assert!(expire_at(&path, "job-42").is_some());

        store.release(&db, &a).await.unwrap();
        assert_eq!(expire_at(&path, "job-42"), None);

        // Second release of the same lease.
        assert!(store.release(&db, &a).await.unwrap_err().is_already_released());
    }

    #[tokio::test]
    async fn test_released_lock_is_free_for_others() {
        let (_dir, path, store) = setup().await;
        let (db_a, db_b) = (process(&path), process(&path));
        let mut a = store.new_lock(&db_a, "job-42").await.unwrap();
        let mut b = store.new_lock(&db_b, "job-42").await.unwrap();

        store.acquire(&db_a, &mut a, TTL).await.unwrap();
        store.release(&db_a, &a).await.unwrap();
        store.acquire(&db_b, &mut b, TTL).await.unwrap();
    }

    #[tokio::test]
    async fn test_extend_keeps_lease_alive() {
        let (_dir, path, store) = setup().await;
        let (db_a, db_b) = (process(&path), process(&path));
        let mut a = store.new_lock(&db_a, "job-42").await.unwrap();
        let mut b = store.new_lock(&db_b, "job-42").await.unwrap();

        store
            .acquire(&db_a, &mut a, Duration::from_millis(300))
            .await
            .unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            store.extend(&db_a, &a).await.unwrap();
        }

        // 450ms after acquiring, well past the first expiry.
        assert!(store
            .acquire(&db_b, &mut b, TTL)
            .await
            .unwrap_err()
            .is_already_acquired());
    }

    #[tokio::test]
    async fn test_release_and_extend_require_an_acquired_lease() {
        let (_dir, path, store) = setup().await;
        let db = process(&path);
        let a = store.new_lock(&db, "job-42").await.unwrap();

        assert!(store.release(&db, &a).await.unwrap_err().is_already_released());
        assert!(store.extend(&db, &a).await.unwrap_err().is_already_released());
    }

    #[tokio::test]
    async fn test_extend_after_release_fails() {
        let (_dir, path, store) = setup().await;
        let db = process(&path);
        let mut a = store.new_lock(&db, "job-42").await.unwrap();

        store.acquire(&db, &mut a, TTL).await.unwrap();
        store.release(&db, &a).await.unwrap();
        assert!(store.extend(&db, &a).await.unwrap_err().is_already_released());
    }

    // =========================================================================
    // Store configuration
    // =========================================================================

    #[tokio::test]
    async fn test_custom_table_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks.db");
        let store = LockStore::with_table_name(Dialect::Sqlite, "my_distributed_locks").unwrap();
        let db = process(&path);
        db.execute_batch(store.create_table_sql()).await.unwrap();

        let mut a = store.new_lock(&db, "job-42").await.unwrap();
        store.acquire(&db, &mut a, TTL).await.unwrap();
        assert_eq!(store.table_name(), "my_distributed_locks");

        db.execute_batch(store.drop_table_sql()).await.unwrap();
        assert!(store.new_lock(&db, "job-42").await.is_err());
    }

    #[test]
    fn test_migrations_wrap_create_and_drop() {
        let store = LockStore::new(Dialect::Postgres).unwrap();
        let migrations = store.migrations();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].id, CREATE_TABLE_MIGRATION_ID);
        assert_eq!(migrations[0].up, vec![store.create_table_sql().to_string()]);
        assert_eq!(migrations[0].down, vec![store.drop_table_sql().to_string()]);
    }

    #[test]
    fn test_store_construction_errors() {
        assert!(matches!(
            LockStore::new(Dialect::MsSql),
            Err(LockError::UnsupportedDialect(_))
        ));
        assert!(matches!(
            LockStore::with_table_name(Dialect::MySql, "bad name"),
            Err(LockError::InvalidTableName(_))
        ));
    }
}
