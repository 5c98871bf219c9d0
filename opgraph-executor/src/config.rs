//! Queue and launch configuration.

use opgraph_core::error::{OpGraphError, Result};

/// Configuration shared by a queue's worker, its launches and its host
/// callback thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum concurrent node executions per launch.
    ///
    /// Set to 1 to run the nodes of a launch one at a time (debugging).
    pub max_concurrent_nodes: usize,
    /// Timeout per node execution in milliseconds. 0 disables the timeout.
    pub node_timeout_ms: u64,
    /// Name of the thread that runs host callbacks.
    pub host_thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 16,
            node_timeout_ms: 30_000,
            host_thread_name: "opgraph-host".to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `OPGRAPH_MAX_CONCURRENT_NODES`: Maximum concurrent node executions
    /// - `OPGRAPH_NODE_TIMEOUT_MS`: Node execution timeout in milliseconds
    /// - `OPGRAPH_HOST_THREAD_NAME`: Host callback thread name
    ///
    /// # Example
    ///
    /// ```bash
    /// export OPGRAPH_MAX_CONCURRENT_NODES=4
    /// export OPGRAPH_NODE_TIMEOUT_MS=0
    /// ```
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent_nodes = std::env::var("OPGRAPH_MAX_CONCURRENT_NODES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_concurrent_nodes);

        let node_timeout_ms = std::env::var("OPGRAPH_NODE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.node_timeout_ms);

        let host_thread_name =
            std::env::var("OPGRAPH_HOST_THREAD_NAME").unwrap_or(defaults.host_thread_name);

        Self {
            max_concurrent_nodes: max_concurrent_nodes.max(1),
            node_timeout_ms,
            host_thread_name,
        }
    }

    /// Set the maximum concurrent node executions (at least 1).
    pub fn with_max_concurrent_nodes(mut self, max: usize) -> Self {
        self.max_concurrent_nodes = max.max(1);
        self
    }

    /// Set the node timeout. 0 disables it.
    pub fn with_node_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.node_timeout_ms = timeout_ms;
        self
    }

    /// Set the host callback thread name.
    pub fn with_host_thread_name(mut self, name: impl Into<String>) -> Self {
        self.host_thread_name = name.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_nodes == 0 {
            return Err(OpGraphError::ConfigValue {
                key: "max_concurrent_nodes".to_string(),
                cause: "must be at least 1".to_string(),
            });
        }
        if self.host_thread_name.is_empty() || self.host_thread_name.contains('\0') {
            return Err(OpGraphError::ConfigValue {
                key: "host_thread_name".to_string(),
                cause: "must be a non-empty name without NUL bytes".to_string(),
            });
        }
        Ok(())
    }

    /// The node timeout, or `None` when disabled.
    pub(crate) fn node_timeout(&self) -> Option<std::time::Duration> {
        (self.node_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.node_timeout_ms))
    }
}
