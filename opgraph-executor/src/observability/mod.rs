//! Diagnostic logging setup.
//!
//! The engine emits `tracing` spans and events for capture, compilation,
//! launches and node execution. This module installs a subscriber for them.
//!
//! # Configuration
//!
//! Logging format is controlled via `OPGRAPH_LOG_FORMAT`:
//! - `json` - Structured JSON output
//! - `pretty` - Human-readable colored output (default for TTY)
//! - `compact` - Compact single-line format (default for non-TTY)
//!
//! # Example
//!
//! ```ignore
//! use opgraph_executor::observability::{TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::default())?;
//!
//! let config = TracingConfig::builder()
//!     .json_format(true)
//!     .log_filter("debug")
//!     .build();
//! let _guard = init_tracing(config)?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, init_tracing};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.log_filter(), "info");
        assert!(config.include_target());
    }

    #[test]
    fn config_builder() {
        let config = TracingConfig::builder()
            .log_format(LogFormat::Json)
            .log_filter("debug")
            .include_thread_names(true)
            .build();

        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.log_filter(), "debug");
        assert!(config.include_thread_names());
        assert!(!config.include_thread_ids());
    }

    #[test]
    fn unknown_format_falls_back_to_default() {
        assert_eq!("yaml".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }
}
