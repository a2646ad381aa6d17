use std::process::ExitCode;

use anyhow::Result;
use sqlease_core::LockStore;

use crate::Commands;
#[cfg(feature = "sqlite")]
use {crate::lease, sqlease_core::ExclusiveOptions, std::time::Duration};

pub async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Ddl {
            dialect,
            table,
            drop,
        } => {
            let store = LockStore::with_table_name(dialect, &table)?;
            let sql = if drop {
                store.drop_table_sql()
            } else {
                store.create_table_sql()
            };
            println!("{}", sql);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("sqlease {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(feature = "sqlite")]
        Commands::Migrate { db, down } => lease::migrate(&db, down).await,
        #[cfg(feature = "sqlite")]
        Commands::Acquire {
            db,
            key,
            ttl_ms,
            token,
        } => lease::acquire(&db, &key, Duration::from_millis(ttl_ms), token.as_deref()).await,
        #[cfg(feature = "sqlite")]
        Commands::Extend {
            db,
            key,
            token,
            ttl_ms,
        } => lease::extend(&db, &key, &token, Duration::from_millis(ttl_ms)).await,
        #[cfg(feature = "sqlite")]
        Commands::Release { db, key, token } => lease::release(&db, &key, &token).await,
        #[cfg(feature = "sqlite")]
        Commands::Run {
            db,
            key,
            ttl_ms,
            extend_interval_ms,
            release_timeout_ms,
            command,
        } => {
            let mut options = ExclusiveOptions::default()
                .with_lock_ttl(Duration::from_millis(ttl_ms))
                .with_release_timeout(Duration::from_millis(release_timeout_ms));
            if let Some(ms) = extend_interval_ms {
                options = options.with_extend_interval(Duration::from_millis(ms));
            }
            lease::run_exclusively(&db, &key, options, command).await
        }
        #[cfg(not(feature = "sqlite"))]
        _ => anyhow::bail!(
            "SQLite storage requested but `sqlite` feature is not enabled. \
             Rebuild with: cargo build --features sqlite"
        ),
    }
}
