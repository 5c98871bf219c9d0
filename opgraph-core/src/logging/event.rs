//! Log event types for capture, compile and launch logging.
//!
//! Provides structured log events with correlation IDs (queue_id, node_id,
//! launch_id) for debugging the engine.

use crate::types::{LaunchId, NodeId, QueueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Log severity level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Fine-grained debugging information.
    Trace,
    /// Debugging information.
    Debug,
    /// Informational messages.
    #[default]
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl LogLevel {
    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or("invalid log level")
    }
}

/// Category of log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    /// Capture session lifecycle (begin, end, abort, join).
    Capture,
    /// Explicit graph construction.
    Graph,
    /// Graph compilation.
    Compile,
    /// Executable graph launches.
    Launch,
    /// Individual node execution.
    Node,
    /// Direct queue submissions and synchronization.
    Queue,
    /// Device allocation and primitive operations.
    Device,
    /// System/internal events.
    System,
}

impl LogCategory {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Graph => "graph",
            Self::Compile => "compile",
            Self::Launch => "launch",
            Self::Node => "node",
            Self::Queue => "queue",
            Self::Device => "device",
            Self::System => "system",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured log event with correlation IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Unique event ID.
    pub id: u64,
    /// Timestamp in nanoseconds since UNIX epoch.
    pub timestamp_ns: u64,
    /// Log severity level.
    pub level: LogLevel,
    /// Event category.
    pub category: LogCategory,
    /// Associated queue (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<QueueId>,
    /// Associated graph node (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Associated launch (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_id: Option<LaunchId>,
    /// Human-readable message.
    pub message: String,
    /// Structured fields for additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
}

impl LogEvent {
    /// Create a new log event with the current timestamp.
    pub fn new(level: LogLevel, category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            id: 0, // Will be assigned by collector
            timestamp_ns: current_timestamp_ns(),
            level,
            category,
            queue_id: None,
            node_id: None,
            launch_id: None,
            message: message.into(),
            fields: HashMap::new(),
        }
    }

    /// Create a trace-level log event.
    pub fn trace(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Trace, category, message)
    }

    /// Create a debug-level log event.
    pub fn debug(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, category, message)
    }

    /// Create an info-level log event.
    pub fn info(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, category, message)
    }

    /// Create a warn-level log event.
    pub fn warn(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, category, message)
    }

    /// Create an error-level log event.
    pub fn error(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, category, message)
    }

    /// Set the queue ID.
    pub fn with_queue_id(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    /// Set the node ID.
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the launch ID.
    pub fn with_launch_id(mut self, launch_id: LaunchId) -> Self {
        self.launch_id = Some(launch_id);
        self
    }

    /// Add a string field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }

    /// Add a numeric field.
    pub fn with_field_i64(mut self, key: impl Into<String>, value: i64) -> Self {
        self.fields
            .insert(key.into(), serde_json::Value::Number(value.into()));
        self
    }

    /// Add a boolean field.
    pub fn with_field_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.fields
            .insert(key.into(), serde_json::Value::Bool(value));
        self
    }

    /// Get the timestamp as a DateTime string (ISO 8601).
    pub fn timestamp_iso(&self) -> String {
        let secs = self.timestamp_ns / 1_000_000_000;
        let nanos = (self.timestamp_ns % 1_000_000_000) as u32;

        if let Some(datetime) = chrono::DateTime::from_timestamp(secs as i64, nanos) {
            datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
        } else {
            format!("{}ns", self.timestamp_ns)
        }
    }

    /// Format as a single log line.
    pub fn format_line(&self) -> String {
        let mut parts = vec![
            self.timestamp_iso(),
            format!("[{}]", self.level.as_str().to_uppercase()),
            format!("[{}]", self.category.as_str()),
        ];

        if let Some(queue_id) = self.queue_id {
            parts.push(format!("queue={}", queue_id.as_u32()));
        }

        if let Some(node_id) = self.node_id {
            parts.push(format!("node={}", node_id.index()));
        }

        if let Some(ref launch_id) = self.launch_id {
            parts.push(format!("launch={}", launch_id.as_uuid()));
        }

        parts.push(self.message.clone());

        if !self.fields.is_empty() {
            let mut fields_str: Vec<String> = self
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            fields_str.sort();
            parts.push(format!("{{{}}}", fields_str.join(", ")));
        }

        parts.join(" ")
    }
}

/// Get current timestamp in nanoseconds since UNIX epoch.
fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GraphId;

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn log_event_format_line() {
        let event = LogEvent::info(LogCategory::Launch, "Launch completed")
            .with_queue_id(QueueId::new(4))
            .with_node_id(NodeId::new(GraphId::new(1), 2))
            .with_field_i64("nodes", 3);

        let line = event.format_line();
        assert!(line.contains("[INFO]"));
        assert!(line.contains("[launch]"));
        assert!(line.contains("queue=4"));
        assert!(line.contains("node=2"));
        assert!(line.contains("Launch completed"));
        assert!(line.contains("nodes=3"));
    }

    #[test]
    fn log_event_serialization() {
        let event = LogEvent::warn(LogCategory::Capture, "Capture abandoned")
            .with_queue_id(QueueId::new(1))
            .with_field_bool("joined", false);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"level\":\"warn\""));
        assert!(json.contains("\"category\":\"capture\""));
        assert!(!json.contains("launch_id"));

        let parsed: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.queue_id, Some(QueueId::new(1)));
        assert_eq!(parsed.message, "Capture abandoned");
    }
}
