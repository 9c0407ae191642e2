//! Connection pooling and recovery module
//!
//! This module provides:
//! - A bounded idle pool with non-blocking, timed and blocking acquisition
//! - A dialer that enforces a ceiling on live connections
//! - A retry executor that discards broken connections and redials
//!   through the endpoint selector, bounded by a retry budget

pub mod config;
pub mod connection;
pub mod error;
pub mod idle;
pub mod retry;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{AcquireMode, DialOptions, PoolConfig};
pub use connection::{ActiveCounter, Connect, Dialer, Lease, PooledConn};
pub use error::PoolError;
pub use idle::ResourcePool;
pub use retry::{is_permanent, permanent, OpContext, Permanent, RetryExecutor, StatsFn};
