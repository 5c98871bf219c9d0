//! opgraph CLI - smoke testing and device inspection for opgraph.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opgraph_executor::observability::{LogFormat, TracingConfig, TracingGuard, init_tracing};

/// opgraph - operation graph capture and execution.
#[derive(Parser)]
#[command(name = "opgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the functional smoke suite against the in-process device
    Smoke {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Run only the named section (repeatable)
        #[arg(short, long = "section", value_name = "NAME")]
        sections: Vec<String>,

        /// Probability of injecting a device fault into each operation
        #[arg(long, value_name = "RATE")]
        chaos_rate: Option<f64>,

        /// Seed for fault injection
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,
    },

    /// Show device properties and memory
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) -> Result<TracingGuard> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let log_format = std::env::var("OPGRAPH_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or_else(|| {
            if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
                LogFormat::Pretty
            } else {
                LogFormat::Compact
            }
        });

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());

    let config = TracingConfig::builder()
        .log_format(log_format)
        .log_filter(log_filter)
        .build();

    init_tracing(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Smoke {
            json,
            sections,
            chaos_rate,
            seed,
        } => {
            let options = commands::smoke::SmokeOptions {
                json,
                sections,
                chaos_rate,
                seed,
            };
            commands::smoke::run(options).await
        }
        Commands::Info { json } => commands::info::run(json),
        Commands::Version => commands::version::run(),
    }
}
