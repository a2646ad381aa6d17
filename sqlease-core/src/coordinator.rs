//! Exclusive execution: acquire a lease, keep it alive while a unit of work
//! runs, then release it.
//!
//! ```text
//! Idle ─► Acquiring ─► Running ─► Releasing ─► Done
//!              │                                 ▲
//!              └────────── acquire error ────────┘
//! ```
//!
//! While the work runs, a background task extends the lease on a fixed
//! interval. The task stops on an explicit signal, never because the caller
//! cancelled, so the lease stays valid until the release that follows. If an
//! extension finds the lease gone, the work's cancellation token is triggered.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::LockError;
use crate::infrastructure::{finish_tx, Database};
use crate::store::LockStore;
use crate::types::Lease;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_EXTEND_INTERVAL: Duration = Duration::from_millis(1);

/// Sink for failures that do not abort the exclusive operation
/// (failed extensions and releases).
pub trait ErrorLogger: Send + Sync {
    fn log_error(&self, message: &str);
}

/// Forwards to `tracing::error!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ErrorLogger for TracingLogger {
    fn log_error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Settings for [`LockStore::do_exclusively`].
#[derive(Clone)]
pub struct ExclusiveOptions {
    lock_ttl: Duration,
    extend_interval: Option<Duration>,
    release_timeout: Duration,
    logger: Arc<dyn ErrorLogger>,
}

impl Default for ExclusiveOptions {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            extend_interval: None,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            logger: Arc::new(TracingLogger),
        }
    }
}

impl std::fmt::Debug for ExclusiveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveOptions")
            .field("lock_ttl", &self.lock_ttl)
            .field("extend_interval", &self.extend_interval())
            .field("release_timeout", &self.release_timeout)
            .finish_non_exhaustive()
    }
}

impl ExclusiveOptions {
    /// TTL of the acquired lease. Zero keeps the default of one minute.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.lock_ttl = ttl;
        }
        self
    }

    /// How often the lease is extended. Defaults to half the TTL.
    pub fn with_extend_interval(mut self, interval: Duration) -> Self {
        self.extend_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Upper bound for the final release. Zero keeps the default of five seconds.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.release_timeout = timeout;
        }
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub fn extend_interval(&self) -> Duration {
        self.extend_interval
            .unwrap_or(self.lock_ttl / 2)
            .max(MIN_EXTEND_INTERVAL)
    }

    pub fn release_timeout(&self) -> Duration {
        self.release_timeout
    }
}

/// Phases of an exclusive execution, reported in trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusivePhase {
    Acquiring,
    Running,
    Releasing,
    Done,
}

impl LockStore {
    /// Acquires `lease`, runs `work` and releases the lease afterwards.
    ///
    /// `work` receives a token derived from `ctx`. It is cancelled when `ctx`
    /// is, when the lease turns out to be lost during an extension, and at the
    /// latest right before the release.
    ///
    /// Returns the acquire error, or whatever `work` returned. Extension and
    /// release failures go to the configured [`ErrorLogger`] only, so they
    /// never mask the result of the work itself.
    ///
    /// If `ctx` fires while the lease is being acquired, the lease is released
    /// again and [`LockError::Cancelled`] is returned without running `work`.
    /// Dropping the returned future or a panic in `work` stops renewal and
    /// releases the lease from a background task.
    pub async fn do_exclusively<D, F, Fut, T, E>(
        &self,
        db: Arc<D>,
        lease: &mut Lease,
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
        let ttl = options.lock_ttl();
        tracing::debug!(key = %lease.key(), phase = ?ExclusivePhase::Acquiring, "acquiring lock");

        // Once started, the acquire transaction runs to completion; a commit
        // racing with cancellation is undone below instead.
        if ctx.is_cancelled() {
            tracing::debug!(key = %lease.key(), phase = ?ExclusivePhase::Done, "cancelled before acquiring");
            return Err(LockError::Cancelled.into());
        }
        if let Err(err) = acquire_in_tx(self, db.as_ref(), lease, ttl).await {
            tracing::debug!(key = %lease.key(), phase = ?ExclusivePhase::Done, error = %err, "lock not acquired");
            return Err(err.into());
        }
        if ctx.is_cancelled() {
            tracing::debug!(key = %lease.key(), token = %lease.token(), phase = ?ExclusivePhase::Releasing, "cancelled while acquiring");
            release_with_timeout(
                self,
                db.as_ref(),
                lease,
                options.release_timeout(),
                options.logger.as_ref(),
            )
            .await;
            return Err(LockError::Cancelled.into());
        }

        let work_ctx = ctx.child_token();
        let stop = CancellationToken::new();
        let mut guard = AbandonGuard {
            store: self.clone(),
            db: db.clone(),
            lease: lease.clone(),
            stop: stop.clone(),
            work_ctx: work_ctx.clone(),
            renewal: Some(tokio::spawn(renew_periodically(
                self.clone(),
                db.clone(),
                lease.clone(),
                options.extend_interval(),
                options.logger.clone(),
                stop.clone(),
                work_ctx.clone(),
            ))),
            release_timeout: options.release_timeout(),
            logger: options.logger.clone(),
        };

        tracing::debug!(key = %lease.key(), token = %lease.token(), phase = ?ExclusivePhase::Running, "lock acquired");
        let result = work(work_ctx.clone()).await;

        // The renewal task must be gone before the release starts.
        stop.cancel();
        if let Some(renewal) = guard.renewal.take() {
            if let Err(join_err) = renewal.await {
                options.logger.log_error(&format!(
                    "lock renewal task for key {} and token {} failed: {}",
                    lease.key(),
                    lease.token(),
                    join_err
                ));
            }
        }
        work_ctx.cancel();

        tracing::debug!(key = %lease.key(), token = %lease.token(), phase = ?ExclusivePhase::Releasing, "releasing lock");
        release_with_timeout(
            self,
            db.as_ref(),
            lease,
            options.release_timeout(),
            options.logger.as_ref(),
        )
        .await;
        tracing::debug!(key = %lease.key(), phase = ?ExclusivePhase::Done, "exclusive execution finished");

        result
    }
}

/// Cleanup for a run that never reached its own release: the
/// `do_exclusively` future was dropped mid-work, or the work panicked.
///
/// Dropping the guard always stops renewal and cancels the work token. While
/// it still owns the renewal task, it also releases the lease in the
/// background once renewal has exited.
struct AbandonGuard<D: Database + ?Sized + 'static> {
    store: LockStore,
    db: Arc<D>,
    lease: Lease,
    stop: CancellationToken,
    work_ctx: CancellationToken,
    renewal: Option<JoinHandle<()>>,
    release_timeout: Duration,
    logger: Arc<dyn ErrorLogger>,
}

impl<D: Database + ?Sized + 'static> Drop for AbandonGuard<D> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.work_ctx.cancel();
        let Some(renewal) = self.renewal.take() else {
            return;
        };

        tracing::debug!(key = %self.lease.key(), token = %self.lease.token(), "exclusive execution abandoned");
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(key = %self.lease.key(), "no runtime to release abandoned lock, it expires after its TTL");
            return;
        };
        let store = self.store.clone();
        let db = self.db.clone();
        let lease = self.lease.clone();
        let release_timeout = self.release_timeout;
        let logger = self.logger.clone();
        runtime.spawn(async move {
            let _ = renewal.await;
            release_with_timeout(&store, db.as_ref(), &lease, release_timeout, logger.as_ref()).await;
        });
    }
}

/// Releases `lease` within `timeout`. Failures other than an already
/// released lease go to `logger`.
async fn release_with_timeout<D>(
    store: &LockStore,
    db: &D,
    lease: &Lease,
    timeout: Duration,
    logger: &dyn ErrorLogger,
) where
    D: Database + ?Sized,
{
    let released = match tokio::time::timeout(timeout, release_in_tx(store, db, lease)).await {
        Ok(res) => res,
        Err(_) => Err(LockError::Timeout(timeout)),
    };
    match released {
        Ok(()) => {}
        // Expected when the renewal task already saw the lease go away.
        Err(LockError::AlreadyReleased) => {
            tracing::debug!(key = %lease.key(), token = %lease.token(), "lock was already released");
        }
        Err(err) => logger.log_error(&format!(
            "failed to release lock with key {} and token {}, error: {}",
            lease.key(),
            lease.token(),
            err
        )),
    }
}

async fn acquire_in_tx<D>(
    store: &LockStore,
    db: &D,
    lease: &mut Lease,
    ttl: Duration,
) -> Result<(), LockError>
where
    D: Database + ?Sized,
{
    let tx = db
        .begin()
        .await
        .map_err(|e| LockError::database("begin transaction", e))?;
    let mut acquired = lease.clone();
    let res = store.acquire(&*tx, &mut acquired, ttl).await;
    finish_tx(tx, res).await?;
    *lease = acquired;
    Ok(())
}

async fn extend_in_tx<D>(store: &LockStore, db: &D, lease: &Lease) -> Result<(), LockError>
where
    D: Database + ?Sized,
{
    let tx = db
        .begin()
        .await
        .map_err(|e| LockError::database("begin transaction", e))?;
    let res = store.extend(&*tx, lease).await;
    finish_tx(tx, res).await
}

async fn release_in_tx<D>(store: &LockStore, db: &D, lease: &Lease) -> Result<(), LockError>
where
    D: Database + ?Sized,
{
    let tx = db
        .begin()
        .await
        .map_err(|e| LockError::database("begin transaction", e))?;
    let res = store.release(&*tx, lease).await;
    finish_tx(tx, res).await
}

async fn renew_periodically<D>(
    store: LockStore,
    db: Arc<D>,
    lease: Lease,
    interval: Duration,
    logger: Arc<dyn ErrorLogger>,
    stop: CancellationToken,
    work_ctx: CancellationToken,
) where
    D: Database + ?Sized,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match extend_in_tx(&store, db.as_ref(), &lease).await {
            Ok(()) => {
                tracing::trace!(key = %lease.key(), token = %lease.token(), "lock extended");
            }
            Err(err) => {
                logger.log_error(&format!(
                    "failed to extend lock with key {} and token {}, error: {}",
                    lease.key(),
                    lease.token(),
                    err
                ));
                if err.is_already_released() {
                    // Exclusivity is lost; stop the work as soon as possible.
                    work_ctx.cancel();
                    return;
                }
            }
        }
    }
}
