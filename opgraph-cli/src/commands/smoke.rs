//! Smoke command - run the functional smoke suite.

use anyhow::{Result, bail};
use opgraph_core::device::MemoryDeviceConfig;
use opgraph_core::logging::BufferedCollector;
use opgraph_core::testing::ChaosConfig;
use opgraph_executor::config::ExecutorConfig;
use opgraph_executor::testing::{Section, SmokeSuite};
use std::sync::Arc;

/// Options for the smoke command.
pub struct SmokeOptions {
    /// Print the report as JSON.
    pub json: bool,
    /// Sections to run; all when empty.
    pub sections: Vec<String>,
    /// Fault injection rate.
    pub chaos_rate: Option<f64>,
    /// Fault injection seed.
    pub seed: Option<u64>,
}

/// Run the smoke command.
pub async fn run(options: SmokeOptions) -> Result<()> {
    let mut device_config = MemoryDeviceConfig::from_env();
    if let Some(rate) = options.chaos_rate {
        let mut chaos = ChaosConfig::failing(rate);
        if let Some(seed) = options.seed {
            chaos = chaos.with_seed(seed);
        }
        device_config = device_config.with_chaos(chaos);
    }
    let device = Arc::new(super::device_from_env(device_config)?);

    let config = ExecutorConfig::from_env();
    config.validate()?;
    let collector = Arc::new(BufferedCollector::with_default_capacity());

    let mut suite = SmokeSuite::new(device)
        .with_config(config)
        .with_collector(collector);
    if !options.sections.is_empty() {
        let sections = options
            .sections
            .iter()
            .map(|name| name.parse::<Section>())
            .collect::<Result<Vec<_>, _>>()?;
        suite = suite.with_sections(sections);
    }

    tracing::info!("Running smoke suite");
    let report = suite.run().await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Smoke suite on: {}", report.device);
        println!("================{}", "=".repeat(report.device.len()));
        println!();
        for section in &report.sections {
            let mark = if section.passed { "✓" } else { "✗" };
            println!(
                "{} {:<22} {:>6} ms  {}",
                mark, section.name, section.duration_ms, section.detail
            );
        }
        println!();
    }

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} of {} sections failed", failed, report.sections.len());
    }
    if !options.json {
        println!("All {} sections passed", report.sections.len());
    }
    Ok(())
}
