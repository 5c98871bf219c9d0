//! Core types for opgraph.
//!
//! This module contains the strongly-typed identifiers used throughout the
//! engine. Every ID is `Copy` and carries its own `Display` prefix so that
//! log output and error messages stay unambiguous.

mod ids;

pub use ids::{BufferId, EventId, ExecId, GraphId, LaunchId, NodeId, QueueId};
