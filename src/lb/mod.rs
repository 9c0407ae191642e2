//! Endpoint selection module for dialpool
//!
//! This module decides which backend address the next connection is dialed to.
//!
//! # Components
//!
//! - [`Endpoint`]: A candidate address with its health flag
//! - [`EndpointSelector`]: Round-robin selection with failover to healthy endpoints
//! - [`HealthVoter`]: Hooks through which dial and operation outcomes flip health
//!
//! # Selection
//!
//! The selector keeps a rotating cursor over the address list. Starting at the
//! cursor it returns the first healthy address. When every address has been
//! voted unhealthy it still returns one (the one at the cursor), so a pool
//! built with at least one address never fails to pick a target.
//!
//! ```rust
//! use dialpool::lb::EndpointSelector;
//!
//! let selector = EndpointSelector::new(["10.0.0.1:6379", "10.0.0.2:6379"]).unwrap();
//! selector.mark_unhealthy("10.0.0.1:6379");
//! assert_eq!(selector.next().unwrap(), "10.0.0.2:6379");
//! ```
//!
//! # Thread Safety
//!
//! The cursor and health table sit behind a single mutex owned by the
//! selector, independent of the pool's own locks. The selector is shared
//! across tasks with `Arc`.

pub mod endpoint;
pub mod health;
pub mod selector;

pub use endpoint::Endpoint;
pub use health::{apply_topology, watch_topology, HealthVoter, NoopVoter, SelectorVoter};
pub use selector::EndpointSelector;
