//! Health vote hooks and topology notifications
//!
//! The dialer and retry executor report every dial and operation outcome
//! through a [`HealthVoter`]. The default implementation forwards the votes
//! straight to the [`EndpointSelector`]; a fleet-health service can be plugged
//! in by implementing the trait and overriding the hooks it cares about.

use super::selector::EndpointSelector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Receives health votes for endpoint addresses
pub trait HealthVoter: Send + Sync {
    /// A new connection to `addr` was established
    fn on_dial_success(&self, selector: &EndpointSelector, addr: &str) {
        selector.mark_healthy(addr);
    }

    /// Dialing, authenticating or pinging `addr` failed
    fn on_dial_failure(&self, selector: &EndpointSelector, addr: &str) {
        selector.mark_unhealthy(addr);
    }

    /// A unit of work succeeded on a connection to `addr`
    fn on_operation_success(&self, selector: &EndpointSelector, addr: &str) {
        selector.mark_healthy(addr);
    }

    /// A unit of work failed on a connection to `addr`
    fn on_operation_failure(&self, selector: &EndpointSelector, addr: &str) {
        selector.mark_unhealthy(addr);
    }
}

/// Forwards every vote to the selector
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorVoter;

impl HealthVoter for SelectorVoter {}

/// Ignores every vote; endpoints stay as configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVoter;

impl HealthVoter for NoopVoter {
    fn on_dial_success(&self, _selector: &EndpointSelector, _addr: &str) {}
    fn on_dial_failure(&self, _selector: &EndpointSelector, _addr: &str) {}
    fn on_operation_success(&self, _selector: &EndpointSelector, _addr: &str) {}
    fn on_operation_failure(&self, _selector: &EndpointSelector, _addr: &str) {}
}

/// Apply one topology notification, returning how many addresses were new
pub fn apply_topology(selector: &EndpointSelector, addrs: &[String]) -> usize {
    let mut added = 0;
    for addr in addrs {
        let addr = addr.trim();
        if addr.is_empty() || selector.contains(addr) {
            continue;
        }
        selector.add_endpoint(addr);
        added += 1;
    }
    added
}

/// Consume topology notifications until the sending side is dropped
///
/// Each message is the current address list reported by a discovery
/// service. Unseen addresses are appended as healthy candidates; known ones
/// are left alone so repeated notifications do not skew the rotation.
pub fn watch_topology(
    selector: Arc<EndpointSelector>,
    mut updates: mpsc::Receiver<Vec<String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(addrs) = updates.recv().await {
            let added = apply_topology(&selector, &addrs);
            debug!(
                reported = addrs.len(),
                added = added,
                total = selector.len(),
                "topology notification applied"
            );
        }
        info!("topology channel closed, watcher stopped");
    })
}
