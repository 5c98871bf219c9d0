//! Log filtering for querying collected events.
//!
//! Provides composable filters for log events based on level, category,
//! queue ID, node ID, launch ID, and message content.

use super::event::{LogCategory, LogEvent, LogLevel};
use crate::types::{LaunchId, NodeId, QueueId};
use serde::{Deserialize, Serialize};

/// A filter for log events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Minimum log level (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_level: Option<LogLevel>,
    /// Allowed categories (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<LogCategory>,
    /// Filter by queue ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<QueueId>,
    /// Filter by node ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Filter by launch ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_id: Option<LaunchId>,
    /// Filter by message content (case-insensitive contains).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_contains: Option<String>,
    /// Maximum number of events to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl LogFilter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum log level.
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Add an allowed category.
    pub fn category(mut self, category: LogCategory) -> Self {
        self.categories.push(category);
        self
    }

    /// Set queue ID filter.
    pub fn queue_id(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    /// Set node ID filter.
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set launch ID filter.
    pub fn launch_id(mut self, launch_id: LaunchId) -> Self {
        self.launch_id = Some(launch_id);
        self
    }

    /// Set message content filter.
    pub fn message_contains(mut self, pattern: impl Into<String>) -> Self {
        self.message_contains = Some(pattern.into());
        self
    }

    /// Set result limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an event matches this filter.
    ///
    /// `limit` is not considered here; it applies to query results.
    pub fn matches(&self, event: &LogEvent) -> bool {
        if let Some(min) = self.min_level {
            if event.level < min {
                return false;
            }
        }

        if !self.categories.is_empty() && !self.categories.contains(&event.category) {
            return false;
        }

        if self.queue_id.is_some() && event.queue_id != self.queue_id {
            return false;
        }

        if self.node_id.is_some() && event.node_id != self.node_id {
            return false;
        }

        if self.launch_id.is_some() && event.launch_id != self.launch_id {
            return false;
        }

        if let Some(ref pattern) = self.message_contains {
            if !event
                .message
                .to_lowercase()
                .contains(&pattern.to_lowercase())
            {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let event = LogEvent::trace(LogCategory::Device, "alloc");
        assert!(LogFilter::new().matches(&event));
    }

    #[test]
    fn level_and_category() {
        let filter = LogFilter::new()
            .min_level(LogLevel::Info)
            .category(LogCategory::Capture);

        assert!(filter.matches(&LogEvent::info(LogCategory::Capture, "begin")));
        assert!(!filter.matches(&LogEvent::debug(LogCategory::Capture, "node")));
        assert!(!filter.matches(&LogEvent::info(LogCategory::Launch, "launch")));
    }

    #[test]
    fn message_contains_is_case_insensitive() {
        let filter = LogFilter::new().message_contains("ABORTED");
        assert!(filter.matches(&LogEvent::warn(LogCategory::Capture, "Capture aborted")));
        assert!(!filter.matches(&LogEvent::warn(LogCategory::Capture, "Capture ended")));
    }

    #[test]
    fn queue_filter() {
        let filter = LogFilter::new().queue_id(QueueId::new(3));
        let event = LogEvent::info(LogCategory::Queue, "sync").with_queue_id(QueueId::new(3));
        assert!(filter.matches(&event));
        assert!(!filter.matches(&LogEvent::info(LogCategory::Queue, "sync")));
    }

    #[test]
    fn filter_serialization() {
        let launch_id = LaunchId::new();
        let filter = LogFilter::new()
            .min_level(LogLevel::Warn)
            .launch_id(launch_id)
            .category(LogCategory::Node)
            .limit(100);

        let json = serde_json::to_string(&filter).unwrap();
        let parsed: LogFilter = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.min_level, Some(LogLevel::Warn));
        assert_eq!(parsed.launch_id, Some(launch_id));
        assert_eq!(parsed.categories, vec![LogCategory::Node]);
        assert_eq!(parsed.limit, Some(100));
    }
}
