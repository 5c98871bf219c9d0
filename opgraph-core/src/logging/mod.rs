//! Structured logging for capture, compilation and graph execution.
//!
//! This module complements `tracing` diagnostics with correlated, queryable
//! events:
//!
//! - **Correlation IDs**: Every log event can be associated with a queue, a graph node and a launch
//! - **Structured Events**: Events contain typed fields for filtering and aggregation
//! - **Buffered Collection**: Thread-safe ring buffer for in-memory log storage
//! - **Filtering**: Query logs by level, category, queue, node, launch and message content
//! - **Real-time Subscribers**: Register callbacks for immediate event notifications
//!
//! # Example
//!
//! ```
//! use opgraph_core::logging::{BufferedCollector, LogCategory, LogContext, LogLevel};
//! use opgraph_core::types::{LaunchId, QueueId};
//! use std::sync::Arc;
//!
//! let collector = Arc::new(BufferedCollector::with_default_capacity());
//! let launch_id = LaunchId::new();
//!
//! let ctx = LogContext::new(collector.clone())
//!     .with_queue_id(QueueId::new(1))
//!     .with_launch_id(launch_id);
//! ctx.info(LogCategory::Launch, "Launch started");
//!
//! assert_eq!(collector.by_launch(launch_id).len(), 1);
//! assert!(collector.by_level(LogLevel::Error).is_empty());
//! ```

mod collector;
mod event;
mod filter;

pub use collector::{
    BufferedCollector, DEFAULT_BUFFER_CAPACITY, LogCollector, LogContext, NullCollector,
};
pub use event::{LogCategory, LogEvent, LogLevel};
pub use filter::LogFilter;
