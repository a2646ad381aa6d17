//! # sqlease-core
//!
//! Distributed lease locks for processes that share nothing but a SQL
//! database. Every state change of a lock is a single conditional `UPDATE`,
//! expiry is evaluated by the database clock, and a crashed holder's lease
//! becomes free once its TTL lapses.
//!
//! - [`dialect`]: statements per SQL dialect
//! - [`store`]: init / acquire / release / extend on a lock row
//! - [`coordinator`]: run work exclusively with automatic renewal
//! - [`infrastructure`]: executor and transaction seams

pub mod client;
pub mod coordinator;
pub mod dialect;
pub mod error;
pub mod infrastructure;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod store;
pub mod types;

pub use client::{create_table_sql, do_exclusively, drop_table_sql};
pub use coordinator::{ErrorLogger, ExclusiveOptions, TracingLogger};
pub use error::{DbError, LockError};
pub use store::{LockStore, Migration};
pub use types::{Dialect, Lease, DEFAULT_TABLE_NAME};

#[cfg(all(test, feature = "sqlite"))]
mod store_test;
