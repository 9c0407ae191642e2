use super::endpoint::Endpoint;
use crate::pool::PoolError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Cursor and health table, guarded together
#[derive(Debug, Default)]
struct SelectorState {
    /// Candidate addresses in selection order. Duplicates are kept.
    addrs: Vec<String>,
    /// Health keyed by address, so duplicate entries share one flag
    health: HashMap<String, Endpoint>,
    /// Position the next scan starts from
    next: usize,
}

impl SelectorState {
    fn is_healthy(&self, addr: &str) -> bool {
        self.health.get(addr).map(|e| e.healthy).unwrap_or(false)
    }

    fn insert(&mut self, addr: &str) -> &mut Endpoint {
        if !self.health.contains_key(addr) {
            self.addrs.push(addr.to_string());
        }
        self.health
            .entry(addr.to_string())
            .or_insert_with(|| Endpoint::new(addr))
    }
}

/// Round-robin endpoint selection with failover to healthy addresses
///
/// The selector never evicts an address. An unhealthy endpoint is skipped
/// while a healthy one exists and is handed out anyway once every
/// candidate has been marked unhealthy.
#[derive(Debug)]
pub struct EndpointSelector {
    state: Mutex<SelectorState>,
}

impl EndpointSelector {
    /// Create a selector over the given addresses, all initially healthy
    pub fn new<I, S>(addrs: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addrs: Vec<String> = addrs.into_iter().map(Into::into).collect();
        if addrs.is_empty() {
            return Err(PoolError::EmptyEndpointSet);
        }

        let health = addrs
            .iter()
            .map(|addr| (addr.clone(), Endpoint::new(addr.as_str())))
            .collect();

        Ok(Self {
            state: Mutex::new(SelectorState {
                addrs,
                health,
                next: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SelectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Select the next address to dial
    ///
    /// Scans forward from the cursor and returns the first healthy address,
    /// leaving the cursor just past it. When a full rotation finds nothing
    /// healthy the address at the cursor is returned and the cursor moves
    /// on by one.
    pub fn next(&self) -> Result<String, PoolError> {
        let mut state = self.lock();
        let len = state.addrs.len();
        if len == 0 {
            return Err(PoolError::EmptyEndpointSet);
        }
        if state.next >= len {
            state.next = 0;
        }

        let start = state.next;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if state.is_healthy(&state.addrs[idx]) {
                state.next = (idx + 1) % len;
                return Ok(state.addrs[idx].clone());
            }
        }

        let addr = state.addrs[start].clone();
        state.next = (start + 1) % len;
        debug!(addr = %addr, "no healthy endpoint, degrading to cursor position");
        Ok(addr)
    }

    /// Mark an address healthy, registering it if unseen
    pub fn mark_healthy(&self, addr: &str) {
        let mut state = self.lock();
        if state.insert(addr).record_success() {
            info!(addr = %addr, "endpoint recovered");
        }
    }

    /// Mark an address unhealthy, registering it if unseen
    pub fn mark_unhealthy(&self, addr: &str) {
        let mut state = self.lock();
        let endpoint = state.insert(addr);
        if endpoint.record_failure() {
            warn!(addr = %addr, failures = endpoint.failures, "endpoint unhealthy");
        }
    }

    /// Append a new candidate with health initially true
    ///
    /// Appending an address that is already known adds another slot in the
    /// rotation and resets its health.
    pub fn add_endpoint(&self, addr: &str) {
        let mut state = self.lock();
        state.addrs.push(addr.to_string());
        state
            .health
            .insert(addr.to_string(), Endpoint::new(addr));
        info!(addr = %addr, total = state.addrs.len(), "endpoint added");
    }

    /// Whether the address is part of the candidate set
    pub fn contains(&self, addr: &str) -> bool {
        self.lock().health.contains_key(addr)
    }

    /// Health of an address, `None` when unknown
    pub fn is_healthy(&self, addr: &str) -> Option<bool> {
        self.lock().health.get(addr).map(|e| e.healthy)
    }

    /// Snapshot of every candidate slot in selection order
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let state = self.lock();
        state
            .addrs
            .iter()
            .map(|addr| {
                state
                    .health
                    .get(addr)
                    .cloned()
                    .unwrap_or_else(|| Endpoint::new(addr.as_str()))
            })
            .collect()
    }

    /// Number of candidate slots (duplicates included)
    pub fn len(&self) -> usize {
        self.lock().addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct addresses currently healthy
    pub fn healthy_count(&self) -> usize {
        self.lock().health.values().filter(|e| e.healthy).count()
    }
}
