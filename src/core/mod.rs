use crate::config::{ClusterConfig, Config};
use crate::lb::{self, Endpoint, EndpointSelector, HealthVoter, SelectorVoter};
use crate::pool::{
    ActiveCounter, Connect, Dialer, OpContext, PoolConfig, PoolError, PooledConn, ResourcePool,
    RetryExecutor, StatsFn,
};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Point-in-time counters for one managed pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live connections, idle or in use
    pub active: usize,
    /// Connections waiting in the idle queue
    pub idle: usize,
    /// Connections established while filling the pool at startup
    pub connected: usize,
    /// Idle-queue capacity
    pub capacity: usize,
    /// Live-connection ceiling
    pub max_connections: usize,
}

/// Managed connection pool for one backend cluster
///
/// Owns the endpoint selector, the live-connection counter, the idle queue
/// and the retry executor. Build one with [`Manager::builder`]; share it
/// across tasks with `Arc`.
pub struct Manager<C: Connect> {
    name: String,
    config: PoolConfig,
    selector: Arc<EndpointSelector>,
    executor: RetryExecutor<C>,
    connected: usize,
}

/// Collects the pieces of a [`Manager`] before the pool is filled
pub struct ManagerBuilder<C: Connect> {
    name: String,
    addrs: Vec<String>,
    connector: C,
    config: PoolConfig,
    voter: Option<Arc<dyn HealthVoter>>,
    stats: Option<StatsFn>,
}

impl<C: Connect> ManagerBuilder<C> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the health hooks (default: forward every vote to the selector)
    pub fn voter(mut self, voter: Arc<dyn HealthVoter>) -> Self {
        self.voter = Some(voter);
        self
    }

    /// Report every operation's label, elapsed time and outcome
    pub fn stats(mut self, stats: StatsFn) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Validate, wire up the components and fill the idle pool
    ///
    /// Fill failures abort construction unless `keep_silent` is set, in which
    /// case the manager starts with however many connections succeeded.
    pub async fn build(self) -> Result<Manager<C>, PoolError> {
        if self.addrs.is_empty() {
            return Err(PoolError::EmptyEndpointSet);
        }
        let config = self.config.normalized();

        let selector = Arc::new(EndpointSelector::new(self.addrs)?);
        let counter = Arc::new(ActiveCounter::new(config.max_connections));
        let voter = self.voter.unwrap_or_else(|| Arc::new(SelectorVoter));
        let dialer = Arc::new(Dialer::new(
            self.connector,
            config.dial.clone(),
            counter,
            Arc::clone(&selector),
            voter,
        ));
        let pool = Arc::new(ResourcePool::new(
            config.pool_size,
            config.acquire_mode,
            config.wait_timeout,
        ));

        let connected = pool.fill(&dialer, config.keep_silent).await?;
        if connected == 0 {
            warn!(
                manager = %self.name,
                "No connection could be established, starting with an empty pool"
            );
        }

        let mut executor = RetryExecutor::new(pool, dialer, config.max_retries);
        if let Some(stats) = self.stats {
            executor = executor.with_stats(stats);
        }

        info!(
            manager = %self.name,
            endpoints = selector.len(),
            connected = connected,
            pool_size = config.pool_size,
            max_connections = config.max_connections,
            mode = ?config.acquire_mode,
            "Connection manager ready"
        );

        Ok(Manager {
            name: self.name,
            config,
            selector,
            executor,
            connected,
        })
    }
}

impl<C: Connect> Manager<C> {
    pub fn builder<I, S>(addrs: I, connector: C) -> ManagerBuilder<C>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ManagerBuilder {
            name: "default".to_string(),
            addrs: addrs.into_iter().map(Into::into).collect(),
            connector,
            config: PoolConfig::default(),
            voter: None,
            stats: None,
        }
    }

    /// Run a unit of work with connection recovery
    ///
    /// `work` may be invoked more than once: after a failure the connection is
    /// discarded and the work is retried on a freshly dialed one, up to
    /// `max_retries` extra attempts.
    pub async fn run<R, F>(&self, label: &str, work: F) -> Result<R, PoolError>
    where
        F: for<'c> FnMut(&'c mut PooledConn<C::Conn>) -> BoxFuture<'c, anyhow::Result<R>> + Send,
        R: Send,
    {
        self.executor.run(&OpContext::new(), label, work).await
    }

    /// Like [`Manager::run`], honoring the context's cancellation and deadline
    pub async fn run_with<R, F>(&self, ctx: &OpContext, label: &str, work: F) -> Result<R, PoolError>
    where
        F: for<'c> FnMut(&'c mut PooledConn<C::Conn>) -> BoxFuture<'c, anyhow::Result<R>> + Send,
        R: Send,
    {
        self.executor.run(ctx, label, work).await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active_connections(),
            idle: self.idle_connections(),
            connected: self.connected,
            capacity: self.config.pool_size,
            max_connections: self.config.max_connections,
        }
    }

    /// Live connections, idle or in use
    pub fn active_connections(&self) -> usize {
        self.executor.dialer().counter().active()
    }

    /// Connections established while filling the pool
    pub fn connected(&self) -> usize {
        self.connected
    }

    pub fn idle_connections(&self) -> usize {
        self.executor.pool().idle_len()
    }

    /// Snapshot of every endpoint and its health
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.selector.endpoints()
    }

    /// Append a candidate endpoint as healthy
    pub fn add_endpoint(&self, addr: &str) {
        self.selector.add_endpoint(addr);
    }

    /// Apply topology notifications from a discovery channel in the background
    pub fn watch_topology(&self, updates: mpsc::Receiver<Vec<String>>) -> JoinHandle<()> {
        lb::watch_topology(Arc::clone(&self.selector), updates)
    }

    pub fn pool(&self) -> &Arc<ResourcePool<C::Conn>> {
        self.executor.pool()
    }

    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close every idle connection
    ///
    /// Connections checked out by running operations are closed when those
    /// operations hand them back to a full pool or drop them.
    pub fn shutdown(&self) -> usize {
        let closed = self.executor.pool().drain();
        info!(manager = %self.name, closed = closed, "Connection manager shut down");
        closed
    }
}

/// Named managers, one per configured cluster
pub struct ManagerMap<C: Connect> {
    managers: HashMap<String, Manager<C>>,
    default: Option<String>,
}

impl<C: Connect> Default for ManagerMap<C> {
    fn default() -> Self {
        Self {
            managers: HashMap::new(),
            default: None,
        }
    }
}

impl<C: Connect> ManagerMap<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager for every cluster in `config`
    ///
    /// `factory` creates the connector for each cluster. Clusters are built in
    /// name order and the first failure aborts the whole map.
    pub async fn from_config<F>(config: &Config, factory: F) -> Result<Self, PoolError>
    where
        F: Fn(&ClusterConfig) -> C,
    {
        let mut names: Vec<&String> = config.clusters.keys().collect();
        names.sort();

        let mut map = Self::new();
        for name in names {
            let cluster = &config.clusters[name];
            let manager = Manager::builder(cluster.addrs.iter().cloned(), factory(cluster))
                .name(name.clone())
                .config(cluster.pool_config())
                .build()
                .await?;
            map.insert(manager);
        }
        map.default = config.default_cluster.clone();

        Ok(map)
    }

    /// Register a manager under its own name, replacing any previous one
    pub fn insert(&mut self, manager: Manager<C>) -> Option<Manager<C>> {
        self.managers.insert(manager.name().to_string(), manager)
    }

    pub fn get(&self, name: &str) -> Result<&Manager<C>, PoolError> {
        self.managers
            .get(name)
            .ok_or_else(|| PoolError::UnknownCluster(name.to_string()))
    }

    /// The manager for the configured default cluster
    pub fn get_default(&self) -> Result<&Manager<C>, PoolError> {
        match &self.default {
            Some(name) => self.get(name),
            None => Err(PoolError::UnknownCluster("<default>".to_string())),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.managers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Drain every manager's idle pool
    pub fn shutdown(&self) -> usize {
        self.managers.values().map(Manager::shutdown).sum()
    }
}
