//! Info command - show device properties.

use anyhow::Result;
use opgraph_core::device::{Device, MemoryDeviceConfig};

/// Run the info command.
pub fn run(json: bool) -> Result<()> {
    let device = super::device_from_env(MemoryDeviceConfig::from_env())?;
    let props = device.properties();
    let memory = device.memory_info();

    if json {
        let value = serde_json::json!({
            "properties": props,
            "memory": memory,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Device: {}", props.name);
    println!("========{}", "=".repeat(props.name.len()));
    println!();
    println!("  PCI bus id:        {}", props.pci_bus_id);
    println!("  Driver version:    {}", format_version(props.driver_version));
    println!("  Runtime version:   {}", format_version(props.runtime_version));
    println!("  Multiprocessors:   {}", props.multiprocessor_count);
    println!("  Threads per block: {}", props.max_threads_per_block);
    println!(
        "  Memory:            {} MiB free of {} MiB",
        memory.free / (1024 * 1024),
        memory.total / (1024 * 1024)
    );

    Ok(())
}

/// Render `1000 * major + 10 * minor` as `major.minor`.
fn format_version(encoded: u32) -> String {
    format!("{}.{}", encoded / 1000, (encoded % 1000) / 10)
}
