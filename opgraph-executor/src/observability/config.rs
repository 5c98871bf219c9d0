//! Configuration types for observability.

use std::env;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for structured logging.
    Json,
    /// Human-readable pretty format with colors.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::default(),
        })
    }
}

/// Configuration for tracing output.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log output format.
    log_format: LogFormat,
    /// Log level filter (e.g., "info", "warn,opgraph_executor=debug").
    log_filter: String,
    /// Whether to include source location in logs.
    include_location: bool,
    /// Whether to include target in logs.
    include_target: bool,
    /// Whether to include thread names in logs.
    include_thread_names: bool,
    /// Whether to include thread IDs in logs.
    include_thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            include_location: false,
            include_target: true,
            include_thread_names: false,
            include_thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Create a new builder.
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `OPGRAPH_LOG_FORMAT`: "json", "pretty", or "compact"
    /// - `OPGRAPH_LOG_LEVEL` or `RUST_LOG`: Log filter string
    /// - `OPGRAPH_LOG_LOCATION`: "true" to include file and line
    /// - `OPGRAPH_LOG_THREAD_NAMES`: "true" to include thread names
    /// - `OPGRAPH_LOG_THREAD_IDS`: "true" to include thread IDs
    pub fn from_env() -> Self {
        let log_format = env::var("OPGRAPH_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse::<LogFormat>().ok())
            .unwrap_or_else(|| {
                if stdout_is_terminal() {
                    LogFormat::Pretty
                } else {
                    LogFormat::Compact
                }
            });

        let log_filter = env::var("OPGRAPH_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Self {
            log_format,
            log_filter,
            include_location: env_flag("OPGRAPH_LOG_LOCATION"),
            include_target: true,
            include_thread_names: env_flag("OPGRAPH_LOG_THREAD_NAMES"),
            include_thread_ids: env_flag("OPGRAPH_LOG_THREAD_IDS"),
        }
    }

    /// Get the log format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Get the log filter.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Check if source location should be included.
    pub fn include_location(&self) -> bool {
        self.include_location
    }

    /// Check if target should be included.
    pub fn include_target(&self) -> bool {
        self.include_target
    }

    /// Check if thread names should be included.
    pub fn include_thread_names(&self) -> bool {
        self.include_thread_names
    }

    /// Check if thread IDs should be included.
    pub fn include_thread_ids(&self) -> bool {
        self.include_thread_ids
    }
}

/// Builder for TracingConfig.
#[derive(Debug, Clone, Default)]
pub struct TracingConfigBuilder {
    log_format: Option<LogFormat>,
    log_filter: Option<String>,
    include_location: Option<bool>,
    include_target: Option<bool>,
    include_thread_names: Option<bool>,
    include_thread_ids: Option<bool>,
}

impl TracingConfigBuilder {
    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    /// Set JSON format (shorthand for `log_format(LogFormat::Json)`).
    pub fn json_format(self, enable: bool) -> Self {
        if enable {
            self.log_format(LogFormat::Json)
        } else {
            self
        }
    }

    /// Set the log filter.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Include source location in logs.
    pub fn include_location(mut self, include: bool) -> Self {
        self.include_location = Some(include);
        self
    }

    /// Include target in logs.
    pub fn include_target(mut self, include: bool) -> Self {
        self.include_target = Some(include);
        self
    }

    /// Include thread names in logs.
    pub fn include_thread_names(mut self, include: bool) -> Self {
        self.include_thread_names = Some(include);
        self
    }

    /// Include thread IDs in logs.
    pub fn include_thread_ids(mut self, include: bool) -> Self {
        self.include_thread_ids = Some(include);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TracingConfig {
        let defaults = TracingConfig::default();
        TracingConfig {
            log_format: self.log_format.unwrap_or(defaults.log_format),
            log_filter: self.log_filter.unwrap_or(defaults.log_filter),
            include_location: self.include_location.unwrap_or(defaults.include_location),
            include_target: self.include_target.unwrap_or(defaults.include_target),
            include_thread_names: self
                .include_thread_names
                .unwrap_or(defaults.include_thread_names),
            include_thread_ids: self
                .include_thread_ids
                .unwrap_or(defaults.include_thread_ids),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false)
}

fn stdout_is_terminal() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}
