//! Bounded store of idle connections
//!
//! The queue never dials on its own. A miss (`PoolEmpty` / `AcquireTimeout`)
//! is a signal for the retry executor to open a fresh connection.

use super::config::AcquireMode;
use super::connection::{Connect, Dialer, PooledConn};
use super::error::PoolError;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Idle connection queue with a configurable acquisition policy
///
/// The semaphore holds one permit per queued connection, so waiting for a
/// permit is waiting for an idle connection to appear.
pub struct ResourcePool<T> {
    idle: Mutex<VecDeque<PooledConn<T>>>,
    available: Semaphore,
    capacity: usize,
    mode: AcquireMode,
    wait_timeout: Duration,
}

impl<T> ResourcePool<T> {
    pub fn new(capacity: usize, mode: AcquireMode, wait_timeout: Duration) -> Self {
        Self {
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            capacity,
            mode,
            wait_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PooledConn<T>>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take an idle connection according to the acquisition mode
    ///
    /// - `Unblock`: fails with `PoolEmpty` straight away when nothing is idle
    /// - `Timeout`: waits up to the wait timeout, then fails with `AcquireTimeout`
    /// - `Block`: waits until a connection is released. This can wait forever
    ///   if no connection is ever returned.
    pub async fn acquire(&self) -> Result<PooledConn<T>, PoolError> {
        let permit = match self.mode {
            AcquireMode::Unblock => self
                .available
                .try_acquire()
                .map_err(|_| PoolError::PoolEmpty)?,
            AcquireMode::Timeout => {
                tokio::time::timeout(self.wait_timeout, self.available.acquire())
                    .await
                    .map_err(|_| PoolError::AcquireTimeout(self.wait_timeout))?
                    .map_err(|_| PoolError::PoolEmpty)?
            }
            AcquireMode::Block => self
                .available
                .acquire()
                .await
                .map_err(|_| PoolError::PoolEmpty)?,
        };
        permit.forget();

        self.lock().pop_front().ok_or(PoolError::PoolEmpty)
    }

    /// Take an idle connection if one is queued, whatever the acquisition mode
    pub fn try_take(&self) -> Option<PooledConn<T>> {
        let permit = self.available.try_acquire().ok()?;
        permit.forget();
        self.lock().pop_front()
    }

    /// Return a connection without blocking
    ///
    /// When the queue is already at capacity the connection is closed, which
    /// also frees its slot in the live-connection counter.
    pub fn release(&self, conn: PooledConn<T>) {
        let mut idle = self.lock();
        if idle.len() < self.capacity {
            idle.push_back(conn);
            self.available.add_permits(1);
            return;
        }
        drop(idle);

        debug!(
            addr = %conn.addr(),
            capacity = self.capacity,
            "Idle pool full, closing connection"
        );
        drop(conn);
    }

    /// Dial connections until the queue is full
    ///
    /// Each connection is dialed to the next selected endpoint and must pass
    /// the connector's liveness check. With `tolerate_partial` failures are
    /// skipped and the pool starts with whatever was achieved; otherwise the
    /// first failure is returned. Returns the number of connections queued.
    pub async fn fill<C>(&self, dialer: &Dialer<C>, tolerate_partial: bool) -> Result<usize, PoolError>
    where
        C: Connect<Conn = T>,
    {
        let mut usable = 0;

        for _ in 0..self.capacity {
            let mut conn = match dialer.dial_next().await {
                Ok(conn) => conn,
                Err(err) if tolerate_partial => {
                    debug!(error = %err, "Skipping failed dial during fill");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if let Err(err) = dialer.ping(&mut conn).await {
                if tolerate_partial {
                    continue;
                }
                return Err(err);
            }

            self.release(conn);
            usable += 1;
        }

        if usable < self.capacity {
            warn!(
                usable = usable,
                capacity = self.capacity,
                "Connection pool partially filled"
            );
        } else {
            info!(usable = usable, "Connection pool filled");
        }

        Ok(usable)
    }

    /// Close every idle connection, returning how many were closed
    pub fn drain(&self) -> usize {
        let mut closed = 0;
        while let Ok(permit) = self.available.try_acquire() {
            permit.forget();
            if self.lock().pop_front().is_some() {
                closed += 1;
            }
        }
        closed
    }

    /// Number of idle connections
    pub fn idle_len(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> AcquireMode {
        self.mode
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::{EndpointSelector, SelectorVoter};
    use crate::pool::config::DialOptions;
    use crate::pool::connection::ActiveCounter;
    use crate::pool::mock::{MockConn, MockConnector};
    use std::sync::Arc;
    use std::time::Instant;

    fn handle(counter: &Arc<ActiveCounter>, id: u64) -> PooledConn<MockConn> {
        let lease = counter.try_acquire().unwrap();
        PooledConn::new(
            MockConn {
                id,
                addr: "a:1".to_string(),
            },
            "a:1",
            lease,
        )
    }

    fn dialer(connector: MockConnector, max: usize, addrs: &[&str]) -> Dialer<MockConnector> {
        Dialer::new(
            connector,
            DialOptions::default(),
            Arc::new(ActiveCounter::new(max)),
            Arc::new(EndpointSelector::new(addrs.iter().copied()).unwrap()),
            Arc::new(SelectorVoter),
        )
    }

    #[tokio::test]
    async fn test_release_then_acquire() {
        let counter = Arc::new(ActiveCounter::new(4));
        let pool = ResourcePool::new(2, AcquireMode::Unblock, Duration::ZERO);

        pool.release(handle(&counter, 7));
        assert_eq!(pool.idle_len(), 1);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, 7);
        assert_eq!(pool.idle_len(), 0);
        assert_eq!(counter.active(), 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let counter = Arc::new(ActiveCounter::new(4));
        let pool = ResourcePool::new(3, AcquireMode::Unblock, Duration::ZERO);
        for id in 0..3 {
            pool.release(handle(&counter, id));
        }

        for id in 0..3 {
            assert_eq!(pool.acquire().await.unwrap().id, id);
        }
    }

    #[tokio::test]
    async fn test_overflow_closes_connection() {
        let counter = Arc::new(ActiveCounter::new(4));
        let pool = ResourcePool::new(1, AcquireMode::Unblock, Duration::ZERO);

        pool.release(handle(&counter, 1));
        pool.release(handle(&counter, 2));

        assert_eq!(pool.idle_len(), 1);
        assert_eq!(counter.active(), 1);
        assert_eq!(pool.acquire().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_unblock_empty() {
        let pool: ResourcePool<MockConn> = ResourcePool::new(1, AcquireMode::Unblock, Duration::ZERO);

        let start = Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::PoolEmpty)));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_timeout_empty() {
        let pool: ResourcePool<MockConn> =
            ResourcePool::new(1, AcquireMode::Timeout, Duration::from_millis(50));

        let start = Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_timeout_receives_released_connection() {
        let counter = Arc::new(ActiveCounter::new(4));
        let pool = Arc::new(ResourcePool::<MockConn>::new(
            1,
            AcquireMode::Timeout,
            Duration::from_secs(2),
        ));

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id) })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.release(handle(&counter, 42));

        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_try_take_ignores_mode() {
        let counter = Arc::new(ActiveCounter::new(4));
        let pool = ResourcePool::new(2, AcquireMode::Block, Duration::ZERO);
        assert!(pool.try_take().is_none());

        pool.release(handle(&counter, 5));
        assert_eq!(pool.try_take().map(|c| c.id), Some(5));
        assert_eq!(pool.idle_len(), 0);
    }

    #[tokio::test]
    async fn test_drain() {
        let counter = Arc::new(ActiveCounter::new(4));
        let pool = ResourcePool::new(3, AcquireMode::Unblock, Duration::ZERO);
        for id in 0..3 {
            pool.release(handle(&counter, id));
        }

        assert_eq!(pool.drain(), 3);
        assert_eq!(pool.idle_len(), 0);
        assert_eq!(counter.active(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::PoolEmpty)));
    }

    #[tokio::test]
    async fn test_fill_full() {
        let dialer = dialer(MockConnector::default(), 4, &["a:1", "a:2"]);
        let pool = ResourcePool::new(4, AcquireMode::Unblock, Duration::ZERO);

        assert_eq!(pool.fill(&dialer, false).await.unwrap(), 4);
        assert_eq!(pool.idle_len(), 4);
        assert_eq!(dialer.counter().active(), 4);
    }

    #[tokio::test]
    async fn test_fill_tolerates_partial_failure() {
        let dialer = dialer(MockConnector::failing(&["a:2"]), 2, &["a:1", "a:2"]);
        let pool = ResourcePool::new(2, AcquireMode::Unblock, Duration::ZERO);

        assert_eq!(pool.fill(&dialer, true).await.unwrap(), 1);
        assert_eq!(pool.idle_len(), 1);
        assert_eq!(dialer.selector().is_healthy("a:2"), Some(false));
    }

    #[tokio::test]
    async fn test_fill_strict_aborts() {
        let dialer = dialer(MockConnector::failing(&["a:2"]), 2, &["a:1", "a:2"]);
        let pool = ResourcePool::new(2, AcquireMode::Unblock, Duration::ZERO);

        let err = pool.fill(&dialer, false).await.unwrap_err();
        assert!(matches!(err, PoolError::Dial { ref addr, .. } if addr == "a:2"));
    }

    #[tokio::test]
    async fn test_fill_strict_aborts_on_dead_ping() {
        let dialer = dialer(MockConnector::default().with_dead_pings(&["a:1"]), 2, &["a:1"]);
        let pool = ResourcePool::new(2, AcquireMode::Unblock, Duration::ZERO);

        let err = pool.fill(&dialer, false).await.unwrap_err();
        assert!(matches!(err, PoolError::Ping { .. }));
        // The connection that failed the check was closed
        assert_eq!(dialer.counter().active(), 0);
    }
}
