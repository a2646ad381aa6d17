use serde::{Deserialize, Serialize};
use std::time::Duration;

/// In-process handle for one lock row.
///
/// A `Lease` never talks to the database itself. It is created by
/// [`LockStore::new_lock`](crate::store::LockStore::new_lock) and its token and
/// TTL only change when the store reports a successful acquire or extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    key: String,
    token: String,
    ttl: Duration,
}

impl Lease {
    /// A handle for an initialized but not yet acquired lock row.
    pub(crate) fn new(key: String) -> Self {
        Self {
            key,
            token: String::new(),
            ttl: Duration::ZERO,
        }
    }

    /// Rebuilds a handle for a lease acquired elsewhere, e.g. by an earlier
    /// invocation of the same program that printed its token.
    pub fn resume(key: impl Into<String>, token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token of the last successful acquisition, empty if never acquired.
    /// Useful in logs when investigating who held a lock.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// TTL used by the last successful acquisition.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_acquired(&self) -> bool {
        !self.token.is_empty()
    }

    pub(crate) fn set_acquired(&mut self, token: String, ttl: Duration) {
        self.token = token;
        self.ttl = ttl;
    }

    pub fn info(&self) -> LeaseInfo {
        LeaseInfo {
            key: self.key.clone(),
            token: self.token.clone(),
            ttl_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Serializable snapshot of a [`Lease`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub key: String,
    pub token: String,
    /// Time-to-live in milliseconds
    pub ttl_ms: u64,
}
