use serde::Serialize;

/// Represents a single candidate backend address with its health flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Address dialed by the connector (e.g., "10.0.0.1:6379")
    pub addr: String,

    /// Whether the last vote for this address was healthy
    pub healthy: bool,

    /// Number of consecutive unhealthy votes (reset on a healthy vote)
    pub failures: u32,
}

impl Endpoint {
    /// Create a new endpoint, healthy until told otherwise
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            healthy: true,
            failures: 0,
        }
    }

    /// Record a healthy vote
    ///
    /// Returns true when the endpoint was unhealthy before the vote.
    pub fn record_success(&mut self) -> bool {
        let recovered = !self.healthy;
        self.healthy = true;
        self.failures = 0;
        recovered
    }

    /// Record an unhealthy vote
    ///
    /// Returns true when the endpoint was healthy before the vote.
    pub fn record_failure(&mut self) -> bool {
        let tripped = self.healthy;
        self.healthy = false;
        self.failures = self.failures.saturating_add(1);
        tripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_creation() {
        let endpoint = Endpoint::new("127.0.0.1:6379");
        assert_eq!(endpoint.addr, "127.0.0.1:6379");
        assert!(endpoint.healthy);
        assert_eq!(endpoint.failures, 0);
    }

    #[test]
    fn test_failure_tracking() {
        let mut endpoint = Endpoint::new("a:1");

        assert!(endpoint.record_failure());
        assert!(!endpoint.healthy);
        assert_eq!(endpoint.failures, 1);

        // Already unhealthy, no transition
        assert!(!endpoint.record_failure());
        assert_eq!(endpoint.failures, 2);

        assert!(endpoint.record_success());
        assert!(endpoint.healthy);
        assert_eq!(endpoint.failures, 0);
        assert!(!endpoint.record_success());
    }
}
