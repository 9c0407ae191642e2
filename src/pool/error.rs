use std::time::Duration;

/// Error types for pool, dialer and retry operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no endpoints configured")]
    EmptyEndpointSet,

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("liveness check failed for {addr}: {source}")]
    Ping {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("live connection ceiling reached ({max})")]
    ResourceExhausted { max: usize },

    #[error("empty connection pool")]
    PoolEmpty,

    #[error("acquire connection timed out after {0:?}")]
    AcquireTimeout(Duration),

    #[error("retry budget exhausted after {attempts} attempts: {last:#}")]
    RetryBudgetExceeded { attempts: u32, last: anyhow::Error },

    #[error("operation failed: {0:#}")]
    Operation(anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("no manager registered for cluster: {0}")]
    UnknownCluster(String),
}

impl PoolError {
    /// The idle pool could not hand out a connection under its policy.
    ///
    /// Callers that may dial are expected to open a fresh connection instead.
    pub fn is_pool_miss(&self) -> bool {
        matches!(self, PoolError::PoolEmpty | PoolError::AcquireTimeout(_))
    }

    /// Whether a caller backing off and trying again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::Dial { .. }
                | PoolError::Ping { .. }
                | PoolError::ResourceExhausted { .. }
                | PoolError::PoolEmpty
                | PoolError::AcquireTimeout(_)
                | PoolError::RetryBudgetExceeded { .. }
        )
    }
}
