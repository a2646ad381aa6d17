use std::time::Duration;
use thiserror::Error;

/// Boxed driver error returned by executors.
pub type DbError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("invalid lock key: {0}")]
    InvalidKey(String),

    #[error("invalid lock table name: {0}")]
    InvalidTableName(String),

    #[error("unsupported sql dialect {0:?}")]
    UnsupportedDialect(String),

    /// Another, unexpired token holds the lease.
    #[error("distributed lock already acquired")]
    AlreadyAcquired,

    /// The lease expired, was released, or was never acquired with this token.
    /// These cases are indistinguishable from the store's point of view.
    #[error("distributed lock already released")]
    AlreadyReleased,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: DbError,
    },
}

impl LockError {
    pub fn database(context: impl Into<String>, source: impl Into<DbError>) -> Self {
        LockError::Database {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_already_acquired(&self) -> bool {
        matches!(self, LockError::AlreadyAcquired)
    }

    pub fn is_already_released(&self) -> bool {
        matches!(self, LockError::AlreadyReleased)
    }
}
