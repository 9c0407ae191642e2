//! Connection handles, the live-connection ceiling and the dialer
//!
//! This module provides:
//! - The [`Connect`] capability a protocol layer implements to open connections
//! - [`PooledConn`], the single-owner handle moved between pool and callers
//! - [`ActiveCounter`], the mutex-guarded ceiling on live connections
//! - [`Dialer`], which opens connections to selected endpoints and reports
//!   the outcome through the health hooks

use super::config::DialOptions;
use super::error::PoolError;
use crate::lb::{EndpointSelector, HealthVoter};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Opens connections to a backend address
///
/// Implemented by the protocol layer. The dialer wraps `connect` in the
/// configured connect timeout; the implementation is expected to apply the
/// read and write timeouts from [`DialOptions`] to the handle it returns.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Establish the transport to `addr`
    async fn connect(&self, addr: &str, options: &DialOptions) -> io::Result<Self::Conn>;

    /// Authenticate a fresh connection. Only called when credentials are configured.
    async fn authenticate(&self, _conn: &mut Self::Conn, _secret: &str) -> io::Result<()> {
        Ok(())
    }

    /// Liveness check used while filling the pool
    async fn ping(&self, _conn: &mut Self::Conn) -> io::Result<()> {
        Ok(())
    }
}

/// Ceiling on live connections, idle or in use
///
/// Check-against-maximum and increment happen under one lock. A successful
/// reservation yields a [`Lease`] that gives the slot back when dropped.
#[derive(Debug)]
pub struct ActiveCounter {
    live: Mutex<usize>,
    max: usize,
}

impl ActiveCounter {
    pub fn new(max: usize) -> Self {
        Self {
            live: Mutex::new(0),
            max,
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot for a new connection
    pub fn try_acquire(self: &Arc<Self>) -> Result<Lease, PoolError> {
        let mut live = self.lock();
        if *live >= self.max {
            return Err(PoolError::ResourceExhausted { max: self.max });
        }
        *live += 1;
        Ok(Lease {
            counter: Arc::clone(self),
        })
    }

    /// Number of live connections
    pub fn active(&self) -> usize {
        *self.lock()
    }

    /// Configured ceiling
    pub fn max(&self) -> usize {
        self.max
    }

    fn release(&self) {
        let mut live = self.lock();
        *live = live.saturating_sub(1);
    }
}

/// A reserved slot in the [`ActiveCounter`], returned on drop
#[derive(Debug)]
pub struct Lease {
    counter: Arc<ActiveCounter>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.counter.release();
    }
}

/// A live connection plus the endpoint it was dialed to
///
/// Exactly one owner at a time: the idle queue, a caller running a unit of
/// work, or nobody (dropped). Dropping the handle closes the connection and
/// frees its slot in the live-connection counter.
pub struct PooledConn<T> {
    conn: T,
    addr: String,
    created_at: Instant,
    use_count: u64,
    _lease: Lease,
}

impl<T> PooledConn<T> {
    pub fn new(conn: T, addr: impl Into<String>, lease: Lease) -> Self {
        Self {
            conn,
            addr: addr.into(),
            created_at: Instant::now(),
            use_count: 0,
            _lease: lease,
        }
    }

    /// Endpoint address this connection was dialed to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Time since the connection was established
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Number of units of work run on this connection
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) fn mark_used(&mut self) {
        self.use_count += 1;
    }
}

impl<T> Deref for PooledConn<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.conn
    }
}

impl<T> DerefMut for PooledConn<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.conn
    }
}

impl<T> fmt::Debug for PooledConn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("addr", &self.addr)
            .field("use_count", &self.use_count)
            .field("age", &self.age())
            .finish()
    }
}

/// Opens new connections under the live-connection ceiling
pub struct Dialer<C: Connect> {
    connector: C,
    options: DialOptions,
    counter: Arc<ActiveCounter>,
    selector: Arc<EndpointSelector>,
    voter: Arc<dyn HealthVoter>,
}

impl<C: Connect> Dialer<C> {
    pub fn new(
        connector: C,
        options: DialOptions,
        counter: Arc<ActiveCounter>,
        selector: Arc<EndpointSelector>,
        voter: Arc<dyn HealthVoter>,
    ) -> Self {
        Self {
            connector,
            options,
            counter,
            selector,
            voter,
        }
    }

    /// Dial `addr`
    ///
    /// Fails with `ResourceExhausted` before any network I/O when the ceiling
    /// is reached. Any connect or authentication failure votes the endpoint
    /// unhealthy and is returned as `PoolError::Dial`.
    pub async fn dial(&self, addr: &str) -> Result<PooledConn<C::Conn>, PoolError> {
        let lease = self.counter.try_acquire()?;

        match self.establish(addr).await {
            Ok(conn) => {
                self.voter.on_dial_success(&self.selector, addr);
                debug!(
                    addr = %addr,
                    active = self.counter.active(),
                    "Created new connection"
                );
                Ok(PooledConn::new(conn, addr, lease))
            }
            Err(source) => {
                self.voter.on_dial_failure(&self.selector, addr);
                warn!(addr = %addr, error = %source, "Failed to dial endpoint");
                Err(PoolError::Dial {
                    addr: addr.to_string(),
                    source,
                })
            }
        }
    }

    /// Ask the selector for an address and dial it
    pub async fn dial_next(&self) -> Result<PooledConn<C::Conn>, PoolError> {
        let addr = self.selector.next()?;
        self.dial(&addr).await
    }

    async fn establish(&self, addr: &str) -> io::Result<C::Conn> {
        let connect = self.connector.connect(addr, &self.options);
        let mut conn = if self.options.connect_timeout.is_zero() {
            connect.await?
        } else {
            tokio::time::timeout(self.options.connect_timeout, connect)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??
        };

        if let Some(secret) = self.options.auth.as_deref() {
            self.connector.authenticate(&mut conn, secret).await?;
        }

        Ok(conn)
    }

    /// Run the connector's liveness check, voting the endpoint unhealthy on failure
    pub async fn ping(&self, conn: &mut PooledConn<C::Conn>) -> Result<(), PoolError> {
        if let Err(source) = self.connector.ping(&mut conn.conn).await {
            self.voter.on_dial_failure(&self.selector, conn.addr());
            warn!(addr = %conn.addr(), error = %source, "Liveness check failed");
            return Err(PoolError::Ping {
                addr: conn.addr().to_string(),
                source,
            });
        }
        Ok(())
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn options(&self) -> &DialOptions {
        &self.options
    }

    pub fn counter(&self) -> &Arc<ActiveCounter> {
        &self.counter
    }

    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    pub fn voter(&self) -> &Arc<dyn HealthVoter> {
        &self.voter
    }
}
