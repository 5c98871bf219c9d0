//! Strongly-typed identifiers for opgraph entities.

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;

static NEXT_QUEUE_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_EVENT_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_EXEC_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a single launch of an executable graph.
///
/// Every launch gets its own ID so that failures and log events can be
/// attributed to one execution even when the same executable graph is
/// launched many times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchId {
    /// UUID bytes in big-endian format.
    bytes: [u8; 16],
}

impl LaunchId {
    /// Create a new random launch ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: *Uuid::new_v4().as_bytes(),
        }
    }

    /// Create a launch ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            bytes: *uuid.as_bytes(),
        }
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.bytes)
    }
}

impl Default for LaunchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "launch_{}", self.as_uuid())
    }
}

impl SerdeSerialize for LaunchId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_uuid().serialize(serializer)
    }
}

impl<'de> SerdeDeserialize<'de> for LaunchId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let uuid = Uuid::deserialize(deserializer)?;
        Ok(Self::from_uuid(uuid))
    }
}

/// Declares a process-unique `u32` identifier backed by a global counter.
macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerdeSerialize, SerdeDeserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Allocate the next process-unique ID.
            #[must_use]
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Create an ID from a raw value.
            #[must_use]
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            /// Get the raw ID value.
            #[must_use]
            pub const fn as_u32(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Identifier for an execution queue.
    QueueId,
    NEXT_QUEUE_ID,
    "queue"
);

counter_id!(
    /// Identifier for a mutable graph under construction.
    GraphId,
    NEXT_GRAPH_ID,
    "graph"
);

counter_id!(
    /// Identifier for a synchronization event.
    EventId,
    NEXT_EVENT_ID,
    "event"
);

counter_id!(
    /// Identifier for a compiled executable graph.
    ExecId,
    NEXT_EXEC_ID,
    "exec"
);

/// Identifier for a node within a graph.
///
/// A node ID is only meaningful inside the graph that created it: it records
/// the owning graph so that IDs handed to the wrong graph are rejected rather
/// than silently aliasing another node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerdeSerialize, SerdeDeserialize,
)]
pub struct NodeId {
    graph: GraphId,
    index: u32,
}

impl NodeId {
    /// Create a node ID for the node at `index` in `graph`.
    #[must_use]
    pub const fn new(graph: GraphId, index: u32) -> Self {
        Self { graph, index }
    }

    /// The graph this node belongs to.
    #[must_use]
    pub const fn graph(&self) -> GraphId {
        self.graph
    }

    /// Position of the node in its graph's arena.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.index)
    }
}

/// Identifier for a device buffer.
///
/// Buffer IDs are never reused within a process, so a stale ID can always be
/// told apart from a live one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerdeSerialize, SerdeDeserialize,
)]
pub struct BufferId(u64);

impl BufferId {
    /// Allocate the next process-unique buffer ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a buffer ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_id_uniqueness() {
        let id1 = LaunchId::new();
        let id2 = LaunchId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn counter_ids_are_unique() {
        let a = QueueId::next();
        let b = QueueId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn node_id_display() {
        let id = NodeId::new(GraphId::new(3), 42);
        assert_eq!(format!("{}", id), "node_42");
        assert_eq!(id.graph(), GraphId::new(3));
    }

    #[test]
    fn nodes_from_different_graphs_differ() {
        let a = NodeId::new(GraphId::new(1), 0);
        let b = NodeId::new(GraphId::new(2), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(format!("{}", QueueId::new(7)), "queue_7");
        assert_eq!(format!("{}", BufferId::new(9)), "buf_9");
        assert_eq!(format!("{}", ExecId::new(2)), "exec_2");
    }

    #[test]
    fn launch_id_serde_roundtrip() {
        let id = LaunchId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: LaunchId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
