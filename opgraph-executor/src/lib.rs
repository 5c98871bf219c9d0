//! opgraph executor - operation graph capture and execution.
//!
//! This crate provides the execution side of opgraph:
//! - Execution queues with FIFO workers and host callback threads
//! - Events for cross-queue ordering and timing
//! - Capture of queue submissions into graphs, including joint captures
//! - Explicit graph construction with cycle rejection
//! - Compilation of graphs into launchable executables
//! - Launch execution with dependency-driven concurrency
//! - Tracing subscriber setup
//! - A functional smoke suite
//!
//! # Example
//!
//! ```
//! use opgraph_core::{Device, MemoryDevice, MemoryKind};
//! use opgraph_executor::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> opgraph_core::Result<()> {
//! let device = Arc::new(MemoryDevice::default());
//! let buffer = device.allocate(64, MemoryKind::Device)?;
//! let queue = Queue::new(device.clone())?;
//!
//! let session = queue.begin_capture()?;
//! queue.fill(buffer.id(), 64, 0x7F)?;
//! let graph = session.end()?;
//!
//! let exec = GraphCompiler::new(device.clone()).compile(&graph)?;
//! queue.launch(&exec)?;
//! queue.launch(&exec)?;
//! queue.synchronize().await?;
//!
//! assert_eq!(exec.launch_count(), 2);
//! assert_eq!(buffer.to_vec()?, vec![0x7F; 64]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod capture;
pub mod compiler;
pub mod config;
mod executor;
pub mod graph;
pub mod observability;
pub mod queue;
pub mod testing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::capture::CaptureSession;
    pub use crate::compiler::{ExecutableGraph, GraphCompiler};
    pub use crate::config::ExecutorConfig;
    pub use crate::graph::{Graph, GraphNode, HostCallback, NodeKind};
    pub use crate::observability::{LogFormat, TracingConfig, TracingGuard, init_tracing};
    pub use crate::queue::{Event, EventFlags, Queue};
    pub use crate::testing::{Section, SectionReport, SmokeSuite, SuiteReport};
}
