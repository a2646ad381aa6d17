mod commands;
#[cfg(feature = "sqlite")]
mod lease;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use sqlease_core::{Dialect, DEFAULT_TABLE_NAME};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sqlease",
    about = "sqlease: distributed lease locks on a shared SQL database",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Location of the lock table.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// SQLite database file shared by all participants
    #[arg(long, env = "SQLEASE_DB")]
    pub db: PathBuf,

    /// Name of the lock table
    #[arg(long, default_value = DEFAULT_TABLE_NAME, env = "SQLEASE_TABLE")]
    pub table: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the DDL of the lock table for a dialect
    Ddl {
        /// sqlite3, mysql, postgres or pgx
        #[arg(long, default_value = "postgres")]
        dialect: Dialect,

        #[arg(long, default_value = DEFAULT_TABLE_NAME)]
        table: String,

        /// Print the DROP statement instead of CREATE
        #[arg(long)]
        drop: bool,
    },

    /// Create (or with --down, drop) the lock table in the database
    Migrate {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        down: bool,
    },

    /// Acquire a lease and print it as JSON
    Acquire {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        key: String,

        /// Lease time-to-live in milliseconds
        #[arg(long, default_value = "60000", value_parser = clap::value_parser!(u64).range(1..))]
        ttl_ms: u64,

        /// Reuse a known token instead of generating one (re-entrant acquire)
        #[arg(long)]
        token: Option<String>,
    },

    /// Push the expiry of a held lease forward
    Extend {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        key: String,

        #[arg(long)]
        token: String,

        #[arg(long, default_value = "60000", value_parser = clap::value_parser!(u64).range(1..))]
        ttl_ms: u64,
    },

    /// Release a held lease
    Release {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        key: String,

        #[arg(long)]
        token: String,
    },

    /// Run a command while holding the lock, renewing it in the background
    Run {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        key: String,

        #[arg(long, default_value = "60000", value_parser = clap::value_parser!(u64).range(1..))]
        ttl_ms: u64,

        /// Renewal period in milliseconds (default: half the TTL)
        #[arg(long)]
        extend_interval_ms: Option<u64>,

        #[arg(long, default_value = "5000")]
        release_timeout_ms: u64,

        /// Command and arguments to run
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match commands::dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_trailing_command() {
        let cli = Cli::try_parse_from([
            "sqlease", "run", "--db", "/tmp/l.db", "--key", "job-42", "--ttl-ms", "200", "--",
            "sh", "-c", "echo hi",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                db,
                key,
                ttl_ms,
                extend_interval_ms,
                release_timeout_ms,
                command,
            } => {
                assert_eq!(db.table, DEFAULT_TABLE_NAME);
                assert_eq!(key, "job-42");
                assert_eq!(ttl_ms, 200);
                assert_eq!(extend_interval_ms, None);
                assert_eq!(release_timeout_ms, 5000);
                assert_eq!(command, ["sh", "-c", "echo hi"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ddl_parses_dialect_names() {
        let cli = Cli::try_parse_from(["sqlease", "ddl", "--dialect", "mysql", "--drop"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ddl { dialect: Dialect::MySql, drop: true, .. }
        ));
        assert!(Cli::try_parse_from(["sqlease", "ddl", "--dialect", "oracle"]).is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(Cli::try_parse_from([
            "sqlease", "acquire", "--db", "l.db", "--key", "k", "--ttl-ms", "0"
        ])
        .is_err());
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["sqlease", "run", "--db", "l.db", "--key", "k"]).is_err());
    }
}
