//! dialpool - Managed connection pool with endpoint failover
//!
//! A bounded pool of reusable connections to a cluster of backend endpoints.
//! Connections are dialed through a round-robin selector that skips endpoints
//! voted unhealthy, and every unit of work runs through a retry executor that
//! discards a failed connection and redials before trying again.

pub mod cli;
pub mod config;
pub mod core;
pub mod lb;
pub mod net;
pub mod pool;

pub use config::{ClusterConfig, Config};
pub use core::{Manager, ManagerBuilder, ManagerMap, PoolStats};
pub use lb::{Endpoint, EndpointSelector, HealthVoter};
pub use net::{LineConn, LineConnector};
pub use pool::{
    permanent, AcquireMode, Connect, DialOptions, OpContext, PoolConfig, PoolError, PooledConn,
};
