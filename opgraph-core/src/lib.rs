//! opgraph core library.
//!
//! This crate provides the foundational types shared by the opgraph capture
//! and execution engine.
//!
//! # Key Components
//!
//! - **Types**: Strongly-typed identifiers for queues, graphs, nodes, buffers and launches
//! - **Error**: The error taxonomy with stable error codes
//! - **Logging**: Structured log events with correlation IDs and a buffered collector
//! - **Device**: The runtime collaborator the engine consumes (buffers, primitive
//!   operations, kernels) and the in-process [`MemoryDevice`]
//! - **Testing**: Fault injection for exercising execution failures
//!
//! # Example
//!
//! ```
//! use opgraph_core::prelude::*;
//!
//! let device = MemoryDevice::new(MemoryDeviceConfig::default());
//! let buffer = device.allocate(1024, MemoryKind::Device).unwrap();
//! assert_eq!(buffer.size(), 1024);
//! device.free(buffer.id()).unwrap();
//! assert!(!device.is_live(buffer.id()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod testing;
pub mod types;

pub use device::{Device, DeviceBuffer, MemoryDevice, MemoryDeviceConfig, MemoryKind};
pub use error::{OpGraphError, Result};
pub use types::{BufferId, ExecId, GraphId, LaunchId, NodeId, QueueId};
