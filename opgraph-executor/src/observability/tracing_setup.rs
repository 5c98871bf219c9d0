//! Tracing subscriber setup with format selection.

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::{TracingConfig, config::LogFormat};

/// Guard returned by [`init_tracing`].
///
/// Keep it alive for the duration of the program.
#[must_use = "dropping the guard early ends the logging session"]
pub struct TracingGuard {
    format: LogFormat,
}

impl TracingGuard {
    /// The format the subscriber was installed with.
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        tracing::trace!("Tracing guard dropped");
    }
}

/// Initialize tracing with the given configuration.
///
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// let _guard = init_tracing(TracingConfig::from_env())?;
/// ```
pub fn init_tracing(config: TracingConfig) -> Result<TracingGuard> {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format() {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_file(config.include_location())
                        .with_line_number(config.include_location())
                        .with_target(config.include_target())
                        .with_thread_names(config.include_thread_names())
                        .with_thread_ids(config.include_thread_ids())
                        .with_span_events(FmtSpan::CLOSE)
                        .flatten_event(true),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_file(config.include_location())
                        .with_line_number(config.include_location())
                        .with_target(config.include_target())
                        .with_thread_names(config.include_thread_names())
                        .with_thread_ids(config.include_thread_ids()),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_file(config.include_location())
                        .with_line_number(config.include_location())
                        .with_target(config.include_target())
                        .with_thread_names(config.include_thread_names())
                        .with_thread_ids(config.include_thread_ids()),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
    }

    Ok(TracingGuard {
        format: config.log_format(),
    })
}
