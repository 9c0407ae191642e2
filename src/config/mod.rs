use crate::pool::{AcquireMode, DialOptions, PoolConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// One backend cluster: its addresses, credentials and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Candidate endpoint addresses (host:port)
    pub addrs: Vec<String>,

    /// Optional password sent when a connection is opened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Idle-pool capacity (default: 16)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Live-connection ceiling (default: pool_size)
    #[serde(default)]
    pub max_connections: usize,

    /// Acquisition mode: unblock, timeout or block
    #[serde(default)]
    pub acquire_mode: AcquireMode,

    /// Wait bound for timeout mode, in milliseconds
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds (0 disables)
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Write timeout in milliseconds (0 disables)
    #[serde(default)]
    pub write_timeout_ms: u64,

    /// Additional attempts after a failed operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Start with a partially filled pool instead of failing
    #[serde(default)]
    pub keep_silent: bool,
}

fn default_pool_size() -> usize {
    crate::pool::config::DEFAULT_POOL_SIZE
}

fn default_wait_timeout_ms() -> u64 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    crate::pool::config::DEFAULT_MAX_RETRIES
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ClusterConfig {
    /// A cluster with the given addresses and every other setting defaulted
    pub fn new(addrs: Vec<String>) -> Self {
        Self {
            addrs,
            auth: None,
            pool_size: default_pool_size(),
            max_connections: 0,
            acquire_mode: AcquireMode::default(),
            wait_timeout_ms: default_wait_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            max_retries: default_max_retries(),
            keep_silent: false,
        }
    }

    /// Convert to the library pool configuration
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            max_connections: self.max_connections,
            acquire_mode: self.acquire_mode,
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            max_retries: self.max_retries,
            keep_silent: self.keep_silent,
            dial: DialOptions {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                read_timeout: millis(self.read_timeout_ms),
                write_timeout: millis(self.write_timeout_ms),
                auth: self.auth.clone().filter(|a| !a.is_empty()),
            },
        }
        .normalized()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named clusters
    #[serde(default)]
    pub clusters: HashMap<String, ClusterConfig>,

    /// Cluster used when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cluster: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cluster by name, or the default cluster if not specified
    pub fn get_cluster(&self, name: Option<&str>) -> Option<(&str, &ClusterConfig)> {
        let name = match name {
            Some(name) => name,
            None => match &self.default_cluster {
                Some(default) => default.as_str(),
                None => {
                    let mut names: Vec<&String> = self.clusters.keys().collect();
                    names.sort();
                    names.first()?.as_str()
                }
            },
        };
        self.clusters
            .get_key_value(name)
            .map(|(name, cluster)| (name.as_str(), cluster))
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    for (name, cluster) in &config.clusters {
        if cluster.addrs.is_empty() {
            anyhow::bail!("Cluster '{}' has no addresses", name);
        }
    }

    Ok(config)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        Err(_) => Ok(None),
    }
}

/// Load configuration from environment variables
///
/// - DIALPOOL_ADDRS (comma-separated list of addresses, required)
/// - DIALPOOL_AUTH
/// - DIALPOOL_POOL_SIZE, DIALPOOL_MAX_CONNECTIONS
/// - DIALPOOL_ACQUIRE_MODE (unblock, timeout, block), DIALPOOL_WAIT_TIMEOUT_MS
/// - DIALPOOL_CONNECT_TIMEOUT_MS, DIALPOOL_READ_TIMEOUT_MS, DIALPOOL_WRITE_TIMEOUT_MS
/// - DIALPOOL_MAX_RETRIES, DIALPOOL_KEEP_SILENT
///
/// Produces a single cluster named `default`. Reads the process environment
/// only; the binary loads any `.env` file before this runs.
pub fn load_from_env() -> Result<Config> {
    let addrs_str =
        std::env::var("DIALPOOL_ADDRS").context("DIALPOOL_ADDRS environment variable not set")?;

    let addrs: Vec<String> = addrs_str
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if addrs.is_empty() {
        anyhow::bail!("DIALPOOL_ADDRS contains no valid addresses");
    }

    let mut cluster = ClusterConfig::new(addrs);
    cluster.auth = std::env::var("DIALPOOL_AUTH").ok().filter(|a| !a.is_empty());

    if let Some(val) = env_parse("DIALPOOL_POOL_SIZE")? {
        cluster.pool_size = val;
    }
    if let Some(val) = env_parse("DIALPOOL_MAX_CONNECTIONS")? {
        cluster.max_connections = val;
    }
    if let Some(val) = env_parse("DIALPOOL_ACQUIRE_MODE")? {
        cluster.acquire_mode = val;
    }
    if let Some(val) = env_parse("DIALPOOL_WAIT_TIMEOUT_MS")? {
        cluster.wait_timeout_ms = val;
    }
    if let Some(val) = env_parse("DIALPOOL_CONNECT_TIMEOUT_MS")? {
        cluster.connect_timeout_ms = val;
    }
    if let Some(val) = env_parse("DIALPOOL_READ_TIMEOUT_MS")? {
        cluster.read_timeout_ms = val;
    }
    if let Some(val) = env_parse("DIALPOOL_WRITE_TIMEOUT_MS")? {
        cluster.write_timeout_ms = val;
    }
    if let Some(val) = env_parse("DIALPOOL_MAX_RETRIES")? {
        cluster.max_retries = val;
    }
    if let Some(val) = env_parse("DIALPOOL_KEEP_SILENT")? {
        cluster.keep_silent = val;
    }

    let mut config = Config::new();
    config.clusters.insert("default".to_string(), cluster);
    config.default_cluster = Some("default".to_string());

    Ok(config)
}

/// Load configuration from file or environment
///
/// # Arguments
/// * `config_path` - Optional path to YAML config file
/// * `cluster_name` - Optional cluster to make the default (only relevant for YAML configs)
pub fn load_config(config_path: Option<&str>, cluster_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        if let Some(name) = cluster_name {
            if !config.clusters.contains_key(name) {
                anyhow::bail!("Cluster '{}' not found in config file", name);
            }
            config.default_cluster = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
