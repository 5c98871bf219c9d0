//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```ignore
//! use opgraph_core::prelude::*;
//! ```

// Core types
pub use crate::types::{BufferId, EventId, ExecId, GraphId, LaunchId, NodeId, QueueId};

// Error handling
pub use crate::error::{OpGraphError, Result, ResultExt};

// Device model
pub use crate::device::{
    BoundOperation, DataOperation, Device, DeviceBuffer, DeviceProperties, FnKernel, Kernel,
    KernelArgs, KernelAttributes, KernelLaunch, LaunchDims, MemoryDevice, MemoryDeviceConfig,
    MemoryInfo, MemoryKind, Operation, PointerAttributes,
};

// Logging
pub use crate::logging::{
    BufferedCollector, LogCategory, LogCollector, LogContext, LogEvent, LogFilter, LogLevel,
    NullCollector,
};

// Fault injection
pub use crate::testing::{ChaosConfig, ChaosEngine, ChaosFault};
