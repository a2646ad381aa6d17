//! Commands that work on the lock table in a SQLite database.

use std::process::{ExitCode, ExitStatus};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlease_core::infrastructure_sqlite::SqliteDatabase;
use sqlease_core::{Dialect, ExclusiveOptions, Lease, LockError, LockStore};
use tokio_util::sync::CancellationToken;

use crate::DbArgs;

/// Exit code when the lock is held by someone else (EX_TEMPFAIL).
pub const LOCK_BUSY_EXIT: u8 = 75;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn open(args: &DbArgs) -> Result<(LockStore, SqliteDatabase)> {
    let store = LockStore::with_table_name(Dialect::Sqlite, &args.table)?;
    let db = SqliteDatabase::open(&args.db)
        .with_context(|| format!("open database {}", args.db.display()))?;
    Ok((store, db))
}

/// Maps lock contention to [`LOCK_BUSY_EXIT`]; other errors propagate.
fn busy_or_fail(err: LockError) -> Result<ExitCode> {
    if err.is_already_acquired() || err.is_already_released() {
        eprintln!("{}", err);
        Ok(ExitCode::from(LOCK_BUSY_EXIT))
    } else {
        Err(err.into())
    }
}

fn lease_outcome(res: Result<(), LockError>, lease: &Lease, what: &str) -> Result<ExitCode> {
    match res {
        Ok(()) => {
            tracing::info!(key = %lease.key(), token = %lease.token(), "lease {}", what);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => busy_or_fail(err),
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub async fn migrate(args: &DbArgs, down: bool) -> Result<ExitCode> {
    let (store, db) = open(args)?;
    let mut migrations = store.migrations();
    if down {
        migrations.reverse();
    }
    for migration in migrations {
        let statements = if down { &migration.down } else { &migration.up };
        for sql in statements {
            db.execute_batch(sql)
                .await
                .map_err(|e| anyhow::anyhow!(e))
                .with_context(|| format!("apply migration {}", migration.id))?;
        }
        tracing::info!(id = migration.id, down, "migration applied");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn acquire(args: &DbArgs, key: &str, ttl: Duration, token: Option<&str>) -> Result<ExitCode> {
    let (store, db) = open(args)?;
    let mut lease = store.new_lock(&db, key).await?;
    let res = match token {
        Some(token) => {
            store
                .acquire_with_static_token(&db, &mut lease, token, ttl)
                .await
        }
        None => store.acquire(&db, &mut lease, ttl).await,
    };
    if let Err(err) = res {
        return busy_or_fail(err);
    }
    println!("{}", serde_json::to_string_pretty(&lease.info())?);
    Ok(ExitCode::SUCCESS)
}

pub async fn extend(args: &DbArgs, key: &str, token: &str, ttl: Duration) -> Result<ExitCode> {
    let (store, db) = open(args)?;
    let lease = Lease::resume(key, token, ttl);
    lease_outcome(store.extend(&db, &lease).await, &lease, "extended")
}

pub async fn release(args: &DbArgs, key: &str, token: &str) -> Result<ExitCode> {
    let (store, db) = open(args)?;
    let lease = Lease::resume(key, token, Duration::ZERO);
    lease_outcome(store.release(&db, &lease).await, &lease, "released")
}

pub async fn run_exclusively(
    args: &DbArgs,
    key: &str,
    options: ExclusiveOptions,
    command: Vec<String>,
) -> Result<ExitCode> {
    let (store, db) = open(args)?;
    let db = Arc::new(db);
    let mut lease = store.new_lock(db.as_ref(), key).await?;

    let ctx = CancellationToken::new();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping");
            on_signal.cancel();
        }
    });

    let res = store
        .do_exclusively(db, &mut lease, &ctx, options, |work| {
            run_child(command, work)
        })
        .await;

    match res {
        Ok(status) => Ok(exit_code(status)),
        Err(err) => match err.downcast::<LockError>() {
            Ok(lock_err) => busy_or_fail(lock_err),
            Err(other) => Err(other),
        },
    }
}

/// Runs `command` until it exits or `work` is cancelled, in which case the
/// child is killed.
async fn run_child(command: Vec<String>, work: CancellationToken) -> Result<ExitStatus> {
    let (program, args) = command.split_first().context("no command given")?;
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawn {}", program))?;
    tracing::info!(pid = child.id(), program = %program, "child started");

    let exited = tokio::select! {
        status = child.wait() => Some(status?),
        _ = work.cancelled() => None,
    };
    match exited {
        Some(status) => Ok(status),
        None => {
            tracing::warn!(program = %program, "lease lost or interrupted, killing child");
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => ExitCode::from(code.clamp(0, 255) as u8),
        None => ExitCode::FAILURE,
    }
}
