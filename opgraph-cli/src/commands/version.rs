//! Version command - show version information.

use anyhow::Result;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("opgraph - operation graph capture and execution");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  opgraph-core      Identifiers, errors, logging, device model");
    println!("  opgraph-executor  Queues, capture, compiler, launch runner");
    println!("  opgraph-cli       Command-line interface");

    Ok(())
}
