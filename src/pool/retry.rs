//! Acquire, run, release-or-discard with a bounded retry budget
//!
//! Every invocation walks the same loop:
//! 1. take an idle connection, or dial a fresh one on a pool miss
//! 2. run the unit of work
//! 3. on success, vote the endpoint healthy and return the connection to the pool
//! 4. on failure, vote it unhealthy, close the connection and, while budget
//!    remains, dial a replacement through the selector and go back to 2
//!
//! A failed redial ends the invocation with the dial error. Waiting for a
//! connection, whether in the idle queue or on a dial, is abandoned as soon as
//! the caller's context is cancelled or its deadline passes.

use super::config::AcquireMode;
use super::connection::{Connect, Dialer, PooledConn};
use super::error::PoolError;
use super::idle::ResourcePool;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Statistics callback: operation label, cumulative elapsed time, final error
pub type StatsFn = Arc<dyn Fn(&str, Duration, Option<&PoolError>) + Send + Sync>;

/// Marks a unit-of-work error as non-retryable
///
/// The connection is assumed healthy (for instance the backend rejected a
/// malformed command), so it goes back to the pool and the error surfaces as
/// `PoolError::Operation` without consuming retry budget.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Permanent(pub String);

/// Build a non-retryable unit-of-work error
pub fn permanent(msg: impl fmt::Display) -> anyhow::Error {
    anyhow::Error::new(Permanent(msg.to_string()))
}

/// Whether any cause in the chain is marked [`Permanent`]
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Permanent>())
}

/// Caller-driven abort signals
///
/// Checked before every attempt and raced against every wait for a
/// connection. A unit of work that is already running is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: Option<CancellationToken>,
    deadline: Option<tokio::time::Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(tokio::time::Instant::now() + timeout)
    }

    /// Fail with `Cancelled` or `DeadlineExceeded` if either signal has fired
    pub fn check(&self) -> Result<(), PoolError> {
        if self.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(PoolError::Cancelled);
        }
        if self
            .deadline
            .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
        {
            return Err(PoolError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes or either signal fires
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, PoolError>
    where
        F: Future<Output = Result<T, PoolError>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(PoolError::Cancelled),
            _ = expired => Err(PoolError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

/// Runs units of work with connection recovery
pub struct RetryExecutor<C: Connect> {
    pool: Arc<ResourcePool<C::Conn>>,
    dialer: Arc<Dialer<C>>,
    max_retries: u32,
    stats: Option<StatsFn>,
}

impl<C: Connect> RetryExecutor<C> {
    pub fn new(pool: Arc<ResourcePool<C::Conn>>, dialer: Arc<Dialer<C>>, max_retries: u32) -> Self {
        Self {
            pool,
            dialer,
            max_retries,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: StatsFn) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Run `work` against a pooled connection
    ///
    /// The statistics callback fires exactly once per call with the elapsed
    /// time across all attempts.
    pub async fn run<R, F>(&self, ctx: &OpContext, label: &str, work: F) -> Result<R, PoolError>
    where
        F: for<'c> FnMut(&'c mut PooledConn<C::Conn>) -> BoxFuture<'c, anyhow::Result<R>> + Send,
        R: Send,
    {
        let start = Instant::now();
        let result = self.execute(ctx, work).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => debug!(
                op = %label,
                elapsed_ms = elapsed.as_millis() as u64,
                "Operation completed"
            ),
            Err(err) => warn!(
                op = %label,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "Operation failed"
            ),
        }

        if let Some(stats) = &self.stats {
            stats(label, elapsed, result.as_ref().err());
        }

        result
    }

    async fn execute<R, F>(&self, ctx: &OpContext, mut work: F) -> Result<R, PoolError>
    where
        F: for<'c> FnMut(&'c mut PooledConn<C::Conn>) -> BoxFuture<'c, anyhow::Result<R>> + Send,
        R: Send,
    {
        let mut conn = ctx.guard(self.checkout()).await?;
        let mut attempt: u32 = 1;

        loop {
            conn.mark_used();
            let outcome = work(&mut conn).await;
            match outcome {
                Ok(value) => {
                    self.dialer
                        .voter()
                        .on_operation_success(self.dialer.selector(), conn.addr());
                    self.pool.release(conn);
                    return Ok(value);
                }
                Err(err) if is_permanent(&err) => {
                    self.pool.release(conn);
                    return Err(PoolError::Operation(err));
                }
                Err(err) => {
                    self.dialer
                        .voter()
                        .on_operation_failure(self.dialer.selector(), conn.addr());
                    debug!(
                        addr = %conn.addr(),
                        attempt = attempt,
                        error = %err,
                        "Discarding connection after failed attempt"
                    );
                    drop(conn);

                    if attempt > self.max_retries {
                        return Err(PoolError::RetryBudgetExceeded {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    attempt += 1;
                    conn = ctx.guard(self.dialer.dial_next()).await?;
                }
            }
        }
    }

    /// Take an idle connection, dialing a fresh one on a pool miss
    ///
    /// In block mode an empty queue only waits when the live-connection
    /// ceiling is reached; below it a fresh connection is dialed so a pool
    /// that lost every connection can refill.
    async fn checkout(&self) -> Result<PooledConn<C::Conn>, PoolError> {
        if self.pool.mode() == AcquireMode::Block {
            if let Some(conn) = self.pool.try_take() {
                return Ok(conn);
            }
            let counter = self.dialer.counter();
            if counter.active() < counter.max() {
                match self.dialer.dial_next().await {
                    Err(PoolError::ResourceExhausted { .. }) => {}
                    other => return other,
                }
            }
            return self.pool.acquire().await;
        }

        match self.pool.acquire().await {
            Ok(conn) => Ok(conn),
            Err(err) if err.is_pool_miss() => {
                debug!(reason = %err, "Idle pool miss, dialing fresh connection");
                self.dialer.dial_next().await
            }
            Err(err) => Err(err),
        }
    }

    pub fn pool(&self) -> &Arc<ResourcePool<C::Conn>> {
        &self.pool
    }

    pub fn dialer(&self) -> &Arc<Dialer<C>> {
        &self.dialer
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::{EndpointSelector, SelectorVoter};
    use crate::pool::config::{AcquireMode, DialOptions};
    use crate::pool::connection::ActiveCounter;
    use crate::pool::mock::MockConnector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn executor(
        connector: MockConnector,
        addrs: &[&str],
        max_retries: u32,
    ) -> RetryExecutor<MockConnector> {
        let dialer = Dialer::new(
            connector,
            DialOptions::default(),
            Arc::new(ActiveCounter::new(8)),
            Arc::new(EndpointSelector::new(addrs.iter().copied()).unwrap()),
            Arc::new(SelectorVoter),
        );
        let pool = ResourcePool::new(2, AcquireMode::Unblock, Duration::ZERO);
        RetryExecutor::new(Arc::new(pool), Arc::new(dialer), max_retries)
    }

    #[tokio::test]
    async fn test_success_dials_on_empty_pool_and_releases() {
        let exec = executor(MockConnector::default(), &["a:1"], 2);

        let value = exec
            .run(&OpContext::new(), "GET", |conn| {
                Box::pin(async move { Ok(conn.addr().to_string()) })
            })
            .await
            .unwrap();

        assert_eq!(value, "a:1");
        assert_eq!(exec.pool().idle_len(), 1);
        assert_eq!(exec.dialer().counter().active(), 1);
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_budget() {
        let exec = executor(MockConnector::default(), &["a:1", "a:2"], 2);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), PoolError> = exec
            .run(&OpContext::new(), "SET", |_conn| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("connection reset by peer")
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(PoolError::RetryBudgetExceeded { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("reset"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Every broken connection was closed
        assert_eq!(exec.dialer().counter().active(), 0);
        assert_eq!(exec.pool().idle_len(), 0);
    }

    #[tokio::test]
    async fn test_zero_budget_runs_once() {
        let exec = executor(MockConnector::default(), &["a:1"], 0);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), PoolError> = exec
            .run(&OpContext::new(), "SET", |_conn| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("broken pipe")
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PoolError::RetryBudgetExceeded { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let exec = executor(MockConnector::default(), &["a:1", "a:2"], 2).with_stats(Arc::new(
            move |label: &str, _elapsed: Duration, err: Option<&PoolError>| {
                sink.lock().unwrap().push((label.to_string(), err.is_none()));
            },
        ));

        let value = exec
            .run(&OpContext::new(), "INCR counter", |conn| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("timeout on {}", conn.addr());
                    }
                    Ok(n)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.as_slice(), &[("INCR counter".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_failure_marks_endpoint_unhealthy() {
        let exec = executor(MockConnector::default(), &["a:1", "a:2"], 1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        exec.run(&OpContext::new(), "GET", |conn| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                let addr = conn.addr().to_string();
                seen.lock().unwrap().push(addr.clone());
                if addr == "a:1" {
                    anyhow::bail!("reset");
                }
                Ok(())
            })
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a:1".to_string(), "a:2".to_string()]);
        let selector = exec.dialer().selector();
        assert_eq!(selector.is_healthy("a:1"), Some(false));
        assert_eq!(selector.is_healthy("a:2"), Some(true));
    }

    #[tokio::test]
    async fn test_redial_failure_is_terminal() {
        let exec = executor(MockConnector::failing(&["a:2"]), &["a:1", "a:2"], 5);
        let conn = exec.dialer().dial("a:1").await.unwrap();
        exec.pool().release(conn);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), PoolError> = exec
            .run(&OpContext::new(), "GET", |_conn| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("reset")
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PoolError::Dial { ref addr, .. }) if addr == "a:2"));
    }

    #[tokio::test]
    async fn test_checkout_dial_failure_returned() {
        let exec = executor(MockConnector::failing(&["a:1"]), &["a:1"], 2);
        let result: Result<(), PoolError> = exec
            .run(&OpContext::new(), "GET", |_conn| Box::pin(async move { Ok(()) }))
            .await;
        assert!(matches!(result, Err(PoolError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retry() {
        let exec = executor(MockConnector::default(), &["a:1"], 3);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), PoolError> = exec
            .run(&OpContext::new(), "EVAL", |_conn| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(permanent("ERR syntax error"))
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PoolError::Operation(_))));
        // Connection survives a protocol-level rejection
        assert_eq!(exec.pool().idle_len(), 1);
        assert_eq!(exec.dialer().selector().is_healthy("a:1"), Some(true));
    }

    #[test]
    fn test_permanent_detection_through_context() {
        let err = permanent("WRONGTYPE").context("while running HGET");
        assert!(is_permanent(&err));
        assert!(!is_permanent(&anyhow::anyhow!("reset")));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let exec = executor(MockConnector::default(), &["a:1"], 2);
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<(), PoolError> = exec
            .run(&OpContext::new().with_cancel(token), "GET", |_conn| {
                Box::pin(async move { Ok(()) })
            })
            .await;

        assert!(matches!(result, Err(PoolError::Cancelled)));
        assert_eq!(exec.dialer().connector().dial_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_between_attempts() {
        let exec = executor(MockConnector::default(), &["a:1"], 5);
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), PoolError> = exec
            .run(&OpContext::new().with_cancel(token.clone()), "GET", |_conn| {
                let calls = Arc::clone(&calls);
                let token = token.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    token.cancel();
                    anyhow::bail!("reset")
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let exec = executor(MockConnector::default(), &["a:1"], 5);
        let ctx = OpContext::new().with_timeout(Duration::from_millis(20));
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), PoolError> = exec
            .run(&ctx, "GET", |_conn| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    anyhow::bail!("slow backend")
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PoolError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_guard_races_signals() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(20));
        let result: Result<(), PoolError> = ctx.guard(std::future::pending()).await;
        assert!(matches!(result, Err(PoolError::DeadlineExceeded)));

        let token = CancellationToken::new();
        let ctx = OpContext::new().with_cancel(token.clone());
        let waiter = tokio::spawn(async move {
            ctx.guard(std::future::pending::<Result<(), PoolError>>()).await
        });
        token.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Cancelled)));

        let ready = OpContext::new().guard(async { Ok(7) }).await.unwrap();
        assert_eq!(ready, 7);
    }

    #[tokio::test]
    async fn test_stats_reports_failure_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let exec = executor(MockConnector::default(), &["a:1"], 1).with_stats(Arc::new(
            move |_label: &str, _elapsed: Duration, err: Option<&PoolError>| {
                assert!(err.is_some());
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let _: Result<(), PoolError> = exec
            .run(&OpContext::new(), "DEL", |_conn| {
                Box::pin(async move { anyhow::bail!("reset") })
            })
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
