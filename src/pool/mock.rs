//! In-memory connector for unit tests

use super::config::DialOptions;
use super::connection::Connect;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct MockConn {
    pub id: u64,
    pub addr: String,
}

#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    failing: HashSet<String>,
    dead_pings: HashSet<String>,
    password: Option<String>,
    connect_delay: Option<Duration>,
    dials: AtomicUsize,
    next_id: AtomicU64,
}

impl MockConnector {
    /// Refuse connections to the given addresses
    pub fn failing(addrs: &[&str]) -> Self {
        Self {
            failing: addrs.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_dead_pings(mut self, addrs: &[&str]) -> Self {
        self.dead_pings = addrs.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Connect attempts that reached the network
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connect for MockConnector {
    type Conn = MockConn;

    async fn connect(&self, addr: &str, _options: &DialOptions) -> io::Result<MockConn> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(addr) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        Ok(MockConn {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            addr: addr.to_string(),
        })
    }

    async fn authenticate(&self, _conn: &mut MockConn, secret: &str) -> io::Result<()> {
        match self.password.as_deref() {
            Some(expected) if expected != secret => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "invalid password",
            )),
            _ => Ok(()),
        }
    }

    async fn ping(&self, conn: &mut MockConn) -> io::Result<()> {
        if self.dead_pings.contains(&conn.addr) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "no pong"));
        }
        Ok(())
    }
}
