//! Error types for opgraph.
//!
//! This module provides strongly-typed errors with actionable context.
//! Every error carries the identifiers (queue, graph, node, launch, buffer)
//! needed to locate the offending operation. Nothing in the engine retries:
//! errors are detected, reported, and left for the caller to handle.

use crate::types::{BufferId, GraphId, LaunchId, NodeId, QueueId};
use thiserror::Error;

/// The main error type for opgraph operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpGraphError {
    // =========================================================================
    // Capture Errors (E100-E199)
    // =========================================================================
    /// A capture session was requested on a queue that is not idle.
    #[error("E101: Queue {queue} is already capturing")]
    AlreadyCapturing {
        /// The queue that is already bound to a capture session.
        queue: QueueId,
    },

    /// The capture reached an inconsistent state and its graph was discarded.
    #[error("E102: Capture on queue {queue} aborted: {cause}")]
    CaptureAborted {
        /// The origin queue of the aborted capture.
        queue: QueueId,
        /// Why the capture was invalidated.
        cause: String,
    },

    // =========================================================================
    // Graph Construction Errors (E200-E299)
    // =========================================================================
    /// A predecessor ID does not belong to the graph.
    #[error("E201: Unknown predecessor {node} in {graph}")]
    UnknownPredecessor {
        /// The graph being modified.
        graph: GraphId,
        /// The predecessor that is not a member of the graph.
        node: NodeId,
    },

    /// The node being modified does not belong to the graph.
    #[error("E202: Unknown node {node} in {graph}")]
    UnknownNode {
        /// The graph being modified.
        graph: GraphId,
        /// The node that is not a member of the graph.
        node: NodeId,
    },

    /// Adding a dependency edge would create a cycle.
    #[error("E203: Dependency {from} -> {to} would create a cycle in {graph}")]
    CycleRejected {
        /// The graph being modified.
        graph: GraphId,
        /// The would-be predecessor.
        from: NodeId,
        /// The node that would depend on `from`.
        to: NodeId,
    },

    // =========================================================================
    // Compile Errors (E300-E399)
    // =========================================================================
    /// The graph failed structural validation during compilation.
    #[error("E301: Invalid graph {graph}: {cause}")]
    InvalidGraph {
        /// The graph that failed to compile.
        graph: GraphId,
        /// Description of the structural problem (cycle or dangling resource).
        cause: String,
    },

    // =========================================================================
    // Execution Errors (E400-E499)
    // =========================================================================
    /// Work submitted to a queue failed while executing.
    #[error("E401: Execution failed on {queue}{}: {cause}", describe_site(.node, .launch))]
    ExecutionError {
        /// The queue the failing work ran on.
        queue: QueueId,
        /// The failing graph node, when the failure came from a graph launch.
        node: Option<NodeId>,
        /// The launch the failing node belonged to.
        launch: Option<LaunchId>,
        /// Reason reported by the failing operation.
        cause: String,
    },

    /// A referenced buffer was freed before compile or launch.
    #[error("E402: Buffer {buffer} is no longer live")]
    ResourceStale {
        /// The freed buffer.
        buffer: BufferId,
    },

    // =========================================================================
    // Runtime/Device Errors (E500-E599)
    // =========================================================================
    /// The device cannot satisfy an allocation.
    #[error("E501: Out of device memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: u64,
        /// Number of bytes available.
        available: u64,
    },

    /// An argument to a runtime operation is invalid.
    #[error("E502: Invalid value for {operation}: {cause}")]
    InvalidValue {
        /// The operation that rejected its arguments.
        operation: String,
        /// Description of the invalid argument.
        cause: String,
    },

    /// A primitive device operation reported a failure.
    #[error("E503: Device fault during {operation}: {cause}")]
    DeviceFault {
        /// The operation that failed.
        operation: String,
        /// Reason reported by the device.
        cause: String,
    },

    /// The queue's worker is gone and can no longer accept work.
    #[error("E504: Queue {queue} is closed")]
    QueueClosed {
        /// The closed queue.
        queue: QueueId,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// Invalid configuration value.
    #[error("E801: Invalid config value for '{key}': {cause}")]
    ConfigValue {
        /// The configuration key with an invalid value.
        key: String,
        /// Description of why the value is invalid.
        cause: String,
    },
}

fn describe_site(node: &Option<NodeId>, launch: &Option<LaunchId>) -> String {
    match (node, launch) {
        (Some(node), Some(launch)) => format!(" at {} ({})", node, launch),
        (Some(node), None) => format!(" at {}", node),
        (None, Some(launch)) => format!(" ({})", launch),
        (None, None) => String::new(),
    }
}

impl OpGraphError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyCapturing { .. } => "E101",
            Self::CaptureAborted { .. } => "E102",
            Self::UnknownPredecessor { .. } => "E201",
            Self::UnknownNode { .. } => "E202",
            Self::CycleRejected { .. } => "E203",
            Self::InvalidGraph { .. } => "E301",
            Self::ExecutionError { .. } => "E401",
            Self::ResourceStale { .. } => "E402",
            Self::OutOfMemory { .. } => "E501",
            Self::InvalidValue { .. } => "E502",
            Self::DeviceFault { .. } => "E503",
            Self::QueueClosed { .. } => "E504",
            Self::ConfigValue { .. } => "E801",
        }
    }

    /// Check if this error comes from capture session misuse or invalidation.
    #[must_use]
    pub fn is_capture_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCapturing { .. } | Self::CaptureAborted { .. }
        )
    }

    /// Check if this error is a graph-construction or compile error.
    ///
    /// These indicate a programming error in the caller and leave all prior
    /// state (queues, other graphs) untouched.
    #[must_use]
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPredecessor { .. }
                | Self::UnknownNode { .. }
                | Self::CycleRejected { .. }
                | Self::InvalidGraph { .. }
        )
    }

    /// Check if this error was raised by work that actually ran.
    #[must_use]
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::ExecutionError { .. })
    }

    /// The graph node this error is attributed to, if any.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::UnknownPredecessor { node, .. } | Self::UnknownNode { node, .. } => Some(*node),
            Self::CycleRejected { to, .. } => Some(*to),
            Self::ExecutionError { node, .. } => *node,
            _ => None,
        }
    }
}

/// Result type alias using `OpGraphError`.
pub type Result<T> = std::result::Result<T, OpGraphError>;

/// Extension trait for attributing foreign errors to an executing node.
pub trait ResultExt<T> {
    /// Convert the error into an [`OpGraphError::ExecutionError`] for `node`.
    fn with_node(self, queue: QueueId, node: NodeId, launch: LaunchId) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn with_node(self, queue: QueueId, node: NodeId, launch: LaunchId) -> Result<T> {
        self.map_err(|e| OpGraphError::ExecutionError {
            queue,
            node: Some(node),
            launch: Some(launch),
            cause: e.to_string(),
        })
    }
}
