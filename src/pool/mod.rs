//! # Connection Pool
//!
//! A generic, hand-rolled connection pool (spec.md §4.7): bounded
//! min/max sizing, FIFO waiters via [`tokio::sync::Semaphore`] (which
//! already wakes waiters in acquisition order), a background idle/health
//! sweep driven by an injected [`Validator`], and scoped acquisition —
//! [`PoolLease`] guarantees the connection returns to the pool (or is
//! destroyed, if it fails validation, or simply dropped if the pool has
//! since closed) on every exit path, including panics, mirroring the
//! teacher's per-collection lock-guard discipline applied here to a
//! pooled resource instead of an in-memory collection.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Future type returned by a connection factory.
pub type FactoryFuture<C> = Pin<Box<dyn Future<Output = Result<C>> + Send>>;

/// Creates a new connection on demand. Boxed so callers can close over
/// driver-specific configuration (DSN, credentials, TLS) without the
/// pool needing to know about any of it.
pub type Factory<C> = Box<dyn Fn() -> FactoryFuture<C> + Send + Sync>;

/// Cheap liveness probe run before handing an idle connection back out
/// (on `acquire`) and during the background sweep (spec.md §4.7). Takes
/// `&mut C` rather than `&C` because most real probes (a `SELECT 1`, a
/// ping frame) need a mutable connection handle the same way
/// [`crate::executor::sql::SqlConnection::query`] does.
pub type Validator<C> = Box<dyn for<'c> Fn(&'c mut C) -> Pin<Box<dyn Future<Output = bool> + Send + 'c>> + Send + Sync>;

/// Tears down a connection that failed validation or aged out of the
/// idle queue. Most backends can no-op here (dropping `C` is enough);
/// this exists as its own collaborator for backends that need an
/// explicit close handshake (spec.md §4.7).
pub type Destroyer<C> = Box<dyn for<'c> Fn(&'c mut C) -> Pin<Box<dyn Future<Output = ()> + Send + 'c>> + Send + Sync>;

fn default_validator<C>() -> Validator<C> {
    Box::new(|_conn: &mut C| Box::pin(async { true }))
}

fn default_destroyer<C>() -> Destroyer<C> {
    Box::new(|_conn: &mut C| Box::pin(async {}))
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::PoolConfig("max_connections must be >= 1".into()));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::PoolConfig("min_connections must be <= max_connections".into()));
        }
        Ok(())
    }
}

struct IdleEntry<C> {
    conn: C,
    idle_since: Instant,
}

struct Shared<C> {
    idle: Mutex<VecDeque<IdleEntry<C>>>,
    factory: Factory<C>,
    destroyer: Destroyer<C>,
    validator: Validator<C>,
    config: PoolConfig,
    closed: AtomicBool,
    total_created: AtomicUsize,
    total_destroyed: AtomicUsize,
    total_acquired: AtomicUsize,
    total_released: AtomicUsize,
    total_timeouts: AtomicUsize,
    waiting_requests: AtomicUsize,
    semaphore: Arc<Semaphore>,
}

/// A generic, backend-agnostic connection pool over any `C`.
///
/// `C` is almost always a [`crate::executor::sql::SqlConnection`]
/// implementation, but the pool itself knows nothing about SQL — it
/// only knows how to create, validate, lend, and retire `C` values.
pub struct Pool<C> {
    shared: Arc<Shared<C>>,
    sweep_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Send + 'static> Pool<C> {
    /// Builds the pool with a no-op destroyer and an always-valid
    /// validator, eagerly creating `min_connections` connections, and
    /// spawning the background idle/health sweep.
    pub async fn new<F, Fut>(config: PoolConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        Self::with_collaborators(config, factory, default_destroyer(), default_validator()).await
    }

    /// Builds the pool with explicit `destroyer`/`validator` collaborators
    /// (spec.md §4.7) — the full constructor for backends that need a
    /// real liveness check or an explicit teardown handshake.
    pub async fn with_collaborators<F, Fut>(config: PoolConfig, factory: F, destroyer: Destroyer<C>, validator: Validator<C>) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        config.validate()?;

        let factory: Factory<C> = Box::new(move || Box::pin(factory()));
        let shared = Arc::new(Shared {
            idle: Mutex::new(VecDeque::new()),
            factory,
            destroyer,
            validator,
            config,
            closed: AtomicBool::new(false),
            total_created: AtomicUsize::new(0),
            total_destroyed: AtomicUsize::new(0),
            total_acquired: AtomicUsize::new(0),
            total_released: AtomicUsize::new(0),
            total_timeouts: AtomicUsize::new(0),
            waiting_requests: AtomicUsize::new(0),
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
        });

        for _ in 0..config.min_connections {
            let conn = (shared.factory)().await.map_err(|e| Error::FactoryFailed(e.to_string()))?;
            shared.total_created.fetch_add(1, Ordering::SeqCst);
            shared.idle.lock().push_back(IdleEntry { conn, idle_since: Instant::now() });
        }

        let sweep_handle = tokio::spawn(sweep_loop(Arc::clone(&shared)));

        Ok(Self { shared, sweep_handle: Mutex::new(Some(sweep_handle)) })
    }

    /// Acquire a connection, waiting in FIFO order if the pool is at
    /// capacity. Fails with [`Error::AcquireTimeout`] if none becomes
    /// available within `acquire_timeout`, or [`Error::PoolClosed`] if
    /// the pool has been closed. Idle connections are validated before
    /// being handed out; one that fails validation is destroyed and the
    /// next idle connection (or a freshly-created one) is tried instead.
    pub async fn acquire(&self) -> Result<PoolLease<C>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        self.shared.waiting_requests.fetch_add(1, Ordering::SeqCst);
        let permit_result = tokio::time::timeout(self.shared.config.acquire_timeout, Arc::clone(&self.shared.semaphore).acquire_owned()).await;
        self.shared.waiting_requests.fetch_sub(1, Ordering::SeqCst);

        let permit = match permit_result {
            Ok(permit) => permit.expect("semaphore never closed while pool is alive"),
            Err(_) => {
                self.shared.total_timeouts.fetch_add(1, Ordering::SeqCst);
                return Err(Error::AcquireTimeout);
            }
        };

        if self.shared.closed.load(Ordering::SeqCst) {
            drop(permit);
            return Err(Error::PoolClosed);
        }

        loop {
            let popped = self.shared.idle.lock().pop_front();
            match popped {
                Some(mut entry) => {
                    if (self.shared.validator)(&mut entry.conn).await {
                        self.shared.total_acquired.fetch_add(1, Ordering::SeqCst);
                        return Ok(PoolLease { shared: Arc::clone(&self.shared), conn: Some(entry.conn), _permit: permit });
                    }
                    (self.shared.destroyer)(&mut entry.conn).await;
                    self.shared.total_destroyed.fetch_add(1, Ordering::SeqCst);
                    debug!("polyquery pool: discarding idle connection that failed validation on acquire");
                }
                None => {
                    let conn = (self.shared.factory)().await.map_err(|e| Error::FactoryFailed(e.to_string()))?;
                    self.shared.total_created.fetch_add(1, Ordering::SeqCst);
                    self.shared.total_acquired.fetch_add(1, Ordering::SeqCst);
                    return Ok(PoolLease { shared: Arc::clone(&self.shared), conn: Some(conn), _permit: permit });
                }
            }
        }
    }

    /// Number of connections created so far (idle + leased + destroyed).
    pub fn total_created(&self) -> usize {
        self.shared.total_created.load(Ordering::SeqCst)
    }

    pub fn total_destroyed(&self) -> usize {
        self.shared.total_destroyed.load(Ordering::SeqCst)
    }

    pub fn total_acquired(&self) -> usize {
        self.shared.total_acquired.load(Ordering::SeqCst)
    }

    pub fn total_released(&self) -> usize {
        self.shared.total_released.load(Ordering::SeqCst)
    }

    pub fn total_timeouts(&self) -> usize {
        self.shared.total_timeouts.load(Ordering::SeqCst)
    }

    pub fn waiting_requests(&self) -> usize {
        self.shared.waiting_requests.load(Ordering::SeqCst)
    }

    /// Connections currently alive: created minus destroyed.
    pub fn total_connections(&self) -> usize {
        self.total_created().saturating_sub(self.total_destroyed())
    }

    pub fn idle_connections(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Connections currently leased out: alive minus idle.
    pub fn active_connections(&self) -> usize {
        self.total_connections().saturating_sub(self.idle_connections())
    }

    /// Deprecated-in-spirit alias kept for existing call sites; prefer
    /// [`Pool::total_created`].
    pub fn created_count(&self) -> usize {
        self.total_created()
    }

    /// Deprecated-in-spirit alias kept for existing call sites; prefer
    /// [`Pool::idle_connections`].
    pub fn idle_count(&self) -> usize {
        self.idle_connections()
    }

    /// Graceful drain: marks the pool closed (future `acquire` calls
    /// fail immediately), destroys all idle connections, and stops the
    /// background sweep. Leases already handed out are unaffected —
    /// they drop normally and their connections are discarded rather
    /// than recycled, since the pool is no longer accepting returns.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let entries: Vec<IdleEntry<C>> = std::mem::take(&mut *self.shared.idle.lock()).into_iter().collect();
        for mut entry in entries {
            (self.shared.destroyer)(&mut entry.conn).await;
            self.shared.total_destroyed.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(handle) = self.sweep_handle.lock().take() {
            handle.abort();
        }
    }
}

impl<C> Drop for Pool<C> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sweep_handle.lock().take() {
            handle.abort();
        }
    }
}

async fn sweep_loop<C: Send + 'static>(shared: Arc<Shared<C>>) {
    let mut ticker = tokio::time::interval(shared.config.health_check_interval);
    loop {
        ticker.tick().await;
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }

        let min = shared.config.min_connections;
        let idle_timeout = shared.config.idle_timeout;
        let entries: Vec<IdleEntry<C>> = std::mem::take(&mut *shared.idle.lock()).into_iter().collect();
        let total = entries.len();

        let mut kept = VecDeque::with_capacity(total);
        let mut kept_count = 0usize;
        for (i, mut entry) in entries.into_iter().enumerate() {
            if !(shared.validator)(&mut entry.conn).await {
                (shared.destroyer)(&mut entry.conn).await;
                shared.total_destroyed.fetch_add(1, Ordering::SeqCst);
                debug!("polyquery pool: destroying idle connection that failed health validation");
                continue;
            }

            let expired = entry.idle_since.elapsed() > idle_timeout;
            let remaining_unvisited = total - i - 1;
            let can_retire = expired && (kept_count + remaining_unvisited >= min);
            if can_retire {
                (shared.destroyer)(&mut entry.conn).await;
                shared.total_destroyed.fetch_add(1, Ordering::SeqCst);
                debug!("polyquery pool: retiring idle connection past idle_timeout");
                continue;
            }
            kept.push_back(entry);
            kept_count += 1;
        }
        *shared.idle.lock() = kept;
    }
}

/// A leased connection. Derefs to `C` so callers use it directly; on
/// drop, the connection is validated and returned to the pool's idle
/// queue, destroyed if invalid, or simply discarded if the pool has
/// since closed. Release happens on every exit path — normal return,
/// early `return`, or panic unwinding — because it lives in `Drop`, not
/// in a method the caller must remember to call.
pub struct PoolLease<C> {
    shared: Arc<Shared<C>>,
    conn: Option<C>,
    _permit: OwnedSemaphorePermit,
}

impl<C> Deref for PoolLease<C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C> DerefMut for PoolLease<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until drop")
    }
}

/// Validation on release needs an `.await`, which `Drop::drop` cannot
/// perform — the check (and the destroy-on-failure path) is handed off
/// to a detached task instead of blocking the dropping thread. The
/// semaphore permit is released synchronously as soon as this function
/// returns, so a waiter can proceed immediately; it may briefly find the
/// idle queue still empty and create a fresh connection rather than wait
/// for the spawned validation to land, which trades a small amount of
/// extra connection churn for never blocking a caller's drop on I/O.
impl<C: Send + 'static> Drop for PoolLease<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            warn!("polyquery pool: lease dropped without a connection");
            return;
        };
        self.shared.total_released.fetch_add(1, Ordering::SeqCst);

        if self.shared.closed.load(Ordering::SeqCst) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let mut conn = conn;
                (shared.destroyer)(&mut conn).await;
                shared.total_destroyed.fetch_add(1, Ordering::SeqCst);
            });
            return;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut conn = conn;
            if (shared.validator)(&mut conn).await {
                shared.idle.lock().push_back(IdleEntry { conn, idle_since: Instant::now() });
            } else {
                (shared.destroyer)(&mut conn).await;
                shared.total_destroyed.fetch_add(1, Ordering::SeqCst);
                debug!("polyquery pool: destroying a released connection that failed validation");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as AU;

    struct Dummy(usize);

    async fn make(counter: Arc<AU>) -> Result<Dummy> {
        Ok(Dummy(counter.fetch_add(1, Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn acquire_reuses_idle_connection() {
        let counter = Arc::new(AU::new(0));
        let c = Arc::clone(&counter);
        let pool = Pool::new(PoolConfig { min_connections: 1, max_connections: 2, ..Default::default() }, move || make(Arc::clone(&c)))
            .await
            .unwrap();
        assert_eq!(pool.total_created(), 1);

        {
            let _lease = pool.acquire().await.unwrap();
        }
        // release validation runs on a detached task; give it a tick to land.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.idle_connections(), 1);

        let _lease2 = pool.acquire().await.unwrap();
        assert_eq!(pool.total_created(), 1, "second acquire should reuse the idle connection, not create one");
    }

    #[tokio::test]
    async fn acquire_times_out_when_pool_exhausted() {
        let counter = Arc::new(AU::new(0));
        let c = Arc::clone(&counter);
        let pool = Pool::new(
            PoolConfig { min_connections: 1, max_connections: 1, acquire_timeout: Duration::from_millis(50), ..Default::default() },
            move || make(Arc::clone(&c)),
        )
        .await
        .unwrap();

        let _held = pool.acquire().await.unwrap();
        let second = pool.acquire().await;
        assert!(matches!(second, Err(Error::AcquireTimeout)));
        assert_eq!(pool.total_timeouts(), 1);
    }

    #[tokio::test]
    async fn release_on_drop_unblocks_next_waiter() {
        let counter = Arc::new(AU::new(0));
        let c = Arc::clone(&counter);
        let pool = Arc::new(
            Pool::new(PoolConfig { min_connections: 1, max_connections: 1, ..Default::default() }, move || make(Arc::clone(&c)))
                .await
                .unwrap(),
        );

        let lease = pool.acquire().await.unwrap();
        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool2.acquire().await.is_ok() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn close_rejects_further_acquires() {
        let counter = Arc::new(AU::new(0));
        let c = Arc::clone(&counter);
        let pool = Pool::new(PoolConfig::default(), move || make(Arc::clone(&c))).await.unwrap();
        pool.close().await;
        assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
        assert_eq!(pool.idle_connections(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let counter = Arc::new(AU::new(0));
        let c = Arc::clone(&counter);
        let result = Pool::new(PoolConfig { min_connections: 5, max_connections: 1, ..Default::default() }, move || make(Arc::clone(&c))).await;
        assert!(matches!(result, Err(Error::PoolConfig(_))));
    }

    #[tokio::test]
    async fn failing_validator_destroys_idle_connection_on_acquire() {
        let counter = Arc::new(AU::new(0));
        let c = Arc::clone(&counter);
        let validator: Validator<Dummy> = Box::new(|conn: &mut Dummy| {
            let reject = conn.0 == 0;
            Box::pin(async move { !reject })
        });
        let pool = Pool::with_collaborators(
            PoolConfig { min_connections: 1, max_connections: 2, ..Default::default() },
            move || make(Arc::clone(&c)),
            default_destroyer(),
            validator,
        )
        .await
        .unwrap();

        assert_eq!(pool.total_created(), 1);
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.0, 1, "the first (invalid) connection was destroyed and a fresh one created");
        assert_eq!(pool.total_destroyed(), 1);
        assert_eq!(pool.total_created(), 2);
    }
}
