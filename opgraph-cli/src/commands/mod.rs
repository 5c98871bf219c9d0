//! CLI command implementations.

pub mod info;
pub mod smoke;
pub mod version;

use opgraph_core::device::{MemoryDevice, MemoryDeviceConfig};

/// Build the in-process device from the environment.
pub(crate) fn device_from_env(config: MemoryDeviceConfig) -> anyhow::Result<MemoryDevice> {
    config.validate()?;
    Ok(MemoryDevice::new(config))
}
