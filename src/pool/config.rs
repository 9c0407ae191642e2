use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default idle-pool capacity
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Default number of additional attempts after the first failure
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default wait for block-with-timeout acquisition when none is configured
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(10);

/// How a caller waits for an idle connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    /// Return immediately with `PoolEmpty` when nothing is idle
    #[default]
    #[serde(alias = "nonblocking", alias = "non_blocking")]
    Unblock,
    /// Wait up to the configured wait timeout
    Timeout,
    /// Wait until a connection is released. Unbounded.
    Block,
}

impl std::str::FromStr for AcquireMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unblock" | "nonblocking" | "non_blocking" => Ok(AcquireMode::Unblock),
            "timeout" => Ok(AcquireMode::Timeout),
            "block" => Ok(AcquireMode::Block),
            other => Err(format!("unknown acquire mode: {}", other)),
        }
    }
}

/// Settings handed to a connector for every new connection
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Upper bound on establishing the transport
    pub connect_timeout: Duration,

    /// Per-read timeout applied to the resulting handle
    pub read_timeout: Option<Duration>,

    /// Per-write timeout applied to the resulting handle
    pub write_timeout: Option<Duration>,

    /// Credentials; when set the connector authenticates before the handle is used
    pub auth: Option<String>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            read_timeout: None,
            write_timeout: None,
            auth: None,
        }
    }
}

/// Configuration for pool behavior. Immutable once a manager is built.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle-pool capacity, also the number of connections dialed at startup
    pub pool_size: usize,

    /// Ceiling on live connections, idle or in use. Zero means `pool_size`.
    pub max_connections: usize,

    /// Acquisition policy
    pub acquire_mode: AcquireMode,

    /// Wait bound for `AcquireMode::Timeout`
    pub wait_timeout: Duration,

    /// Additional attempts after the first failed execution
    pub max_retries: u32,

    /// Start with a partially filled pool instead of failing construction
    pub keep_silent: bool,

    /// Connector settings
    pub dial: DialOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_connections: 0,
            acquire_mode: AcquireMode::default(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            keep_silent: false,
            dial: DialOptions::default(),
        }
    }
}

impl PoolConfig {
    /// Fill in defaults for unset values and clamp the live-connection ceiling
    pub fn normalized(mut self) -> Self {
        if self.pool_size == 0 {
            self.pool_size = DEFAULT_POOL_SIZE;
        }
        if self.max_connections < self.pool_size {
            self.max_connections = self.pool_size;
        }
        match self.acquire_mode {
            AcquireMode::Unblock => self.wait_timeout = Duration::ZERO,
            AcquireMode::Timeout if self.wait_timeout.is_zero() => {
                self.wait_timeout = DEFAULT_WAIT_TIMEOUT;
            }
            _ => {}
        }
        self
    }
}
