//! Testing utilities.
//!
//! Fault injection for exercising the execution-failure paths of queues and
//! graph launches without a misbehaving device.

pub mod chaos;

pub use chaos::{ChaosConfig, ChaosEngine, ChaosFault};
