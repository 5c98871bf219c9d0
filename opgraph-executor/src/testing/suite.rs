//! Functional smoke suite.

use crate::compiler::GraphCompiler;
use crate::config::ExecutorConfig;
use crate::graph::HostCallback;
use crate::queue::{Event, EventFlags, Queue};
use anyhow::{Context as _, bail, ensure};
use opgraph_core::device::{Device, FnKernel, Kernel, LaunchDims, MemoryKind};
use opgraph_core::error::OpGraphError;
use opgraph_core::logging::{LogCategory, LogCollector, LogEvent, NullCollector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// A named part of the smoke suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Device properties and versions.
    DeviceInfo,
    /// Device and managed allocations, fill, address range, memory info.
    Memory,
    /// Capture, host callback on the frontier, compile and launch.
    Graphs,
    /// Pointer attributes and events.
    PointerAndEvents,
    /// Kernel attributes and a kernel launch.
    KernelLaunch,
    /// Uploads and cross-queue event ordering.
    AsyncAndStreamOps,
    /// Pinned host allocations.
    HostMemory,
}

impl Section {
    /// Every section, in run order.
    pub const ALL: [Section; 7] = [
        Section::DeviceInfo,
        Section::Memory,
        Section::Graphs,
        Section::PointerAndEvents,
        Section::KernelLaunch,
        Section::AsyncAndStreamOps,
        Section::HostMemory,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceInfo => "device_info",
            Self::Memory => "memory",
            Self::Graphs => "graphs",
            Self::PointerAndEvents => "pointer_and_events",
            Self::KernelLaunch => "kernel_launch",
            Self::AsyncAndStreamOps => "async_and_stream_ops",
            Self::HostMemory => "host_memory",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = OpGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| OpGraphError::InvalidValue {
                operation: "select smoke section".to_string(),
                cause: format!("unknown section '{}'", s),
            })
    }
}

/// Outcome of one section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    /// Section name.
    pub name: String,
    /// Whether every check passed.
    pub passed: bool,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// What was checked, or why it failed.
    pub detail: String,
}

/// Outcome of a suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Name of the device the suite ran on.
    pub device: String,
    /// One report per section, in run order.
    pub sections: Vec<SectionReport>,
}

impl SuiteReport {
    /// Whether every section passed.
    pub fn passed(&self) -> bool {
        self.sections.iter().all(|s| s.passed)
    }

    /// Sections that failed.
    pub fn failures(&self) -> impl Iterator<Item = &SectionReport> {
        self.sections.iter().filter(|s| !s.passed)
    }

    /// Look up a section's report by name.
    pub fn section(&self, name: &str) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// Runs end-to-end checks of the engine against a device.
///
/// # Example
///
/// ```
/// use opgraph_core::MemoryDevice;
/// use opgraph_executor::testing::{Section, SmokeSuite};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let report = SmokeSuite::new(Arc::new(MemoryDevice::default()))
///     .with_sections([Section::Graphs])
///     .run()
///     .await;
/// assert!(report.passed());
/// # }
/// ```
pub struct SmokeSuite {
    device: Arc<dyn Device>,
    config: ExecutorConfig,
    collector: Arc<dyn LogCollector>,
    sections: Vec<Section>,
}

impl SmokeSuite {
    /// Create a suite that runs every section on `device`.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            config: ExecutorConfig::default(),
            collector: Arc::new(NullCollector),
            sections: Section::ALL.to_vec(),
        }
    }

    /// Configuration for the queues the suite creates.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Collector for the suite's queues, compiler and results.
    pub fn with_collector(mut self, collector: Arc<dyn LogCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// Run only `sections`, in run order.
    pub fn with_sections(mut self, sections: impl IntoIterator<Item = Section>) -> Self {
        let selected: Vec<Section> = sections.into_iter().collect();
        self.sections = Section::ALL
            .into_iter()
            .filter(|s| selected.contains(s))
            .collect();
        self
    }

    /// Run the selected sections. A failing section does not stop the run.
    pub async fn run(&self) -> SuiteReport {
        let mut sections = Vec::with_capacity(self.sections.len());

        for section in &self.sections {
            let started = Instant::now();
            let outcome = self.run_section(*section).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let report = match outcome {
                Ok(detail) => {
                    info!(section = %section, duration_ms, "Smoke section passed");
                    SectionReport {
                        name: section.to_string(),
                        passed: true,
                        duration_ms,
                        detail,
                    }
                }
                Err(err) => {
                    warn!(section = %section, error = %format!("{:#}", err), "Smoke section failed");
                    SectionReport {
                        name: section.to_string(),
                        passed: false,
                        duration_ms,
                        detail: format!("{:#}", err),
                    }
                }
            };

            self.collector.collect(
                LogEvent::info(LogCategory::System, "Smoke section finished")
                    .with_field("section", report.name.clone())
                    .with_field_bool("passed", report.passed)
                    .with_field_i64("duration_ms", duration_ms as i64),
            );
            sections.push(report);
        }

        SuiteReport {
            device: self.device.properties().name.clone(),
            sections,
        }
    }

    async fn run_section(&self, section: Section) -> anyhow::Result<String> {
        match section {
            Section::DeviceInfo => self.device_info(),
            Section::Memory => self.memory().await,
            Section::Graphs => self.graphs().await,
            Section::PointerAndEvents => self.pointer_and_events().await,
            Section::KernelLaunch => self.kernel_launch().await,
            Section::AsyncAndStreamOps => self.async_and_stream_ops().await,
            Section::HostMemory => self.host_memory().await,
        }
    }

    fn queue(&self) -> anyhow::Result<Queue> {
        Queue::with_options(
            Arc::clone(&self.device),
            self.config.clone(),
            Arc::clone(&self.collector),
        )
        .context("create queue")
    }

    fn device_info(&self) -> anyhow::Result<String> {
        let props = self.device.properties();
        ensure!(props.total_memory > 0, "device reports no memory");
        ensure!(
            props.max_threads_per_block > 0,
            "device reports a zero block size limit"
        );
        Ok(format!(
            "{}: {} MiB, {} multiprocessors, {} threads/block, pci {}, driver {}, runtime {}",
            props.name,
            props.total_memory / (1024 * 1024),
            props.multiprocessor_count,
            props.max_threads_per_block,
            props.pci_bus_id,
            props.driver_version,
            props.runtime_version,
        ))
    }

    async fn memory(&self) -> anyhow::Result<String> {
        const SIZE: u64 = 1024 * 1024;
        let device = &self.device;

        let local = device.allocate(SIZE, MemoryKind::Device)?;
        let managed = device.allocate(SIZE, MemoryKind::Managed)?;
        let info = device.memory_info();
        ensure!(info.free <= info.total, "free memory exceeds total");

        let queue = self.queue()?;
        queue.fill(local.id(), SIZE, 0x5A)?;
        queue.fill(managed.id(), SIZE, 0xA5)?;
        queue.synchronize().await?;

        ensure!(
            device.read(local.id())?.iter().all(|b| *b == 0x5A),
            "device allocation was not filled"
        );
        ensure!(
            device.read(managed.id())?.iter().all(|b| *b == 0xA5),
            "managed allocation was not filled"
        );

        let (base, size) = device.address_range(local.id())?;
        ensure!(size == SIZE, "address range reports {} bytes", size);

        device.free(local.id())?;
        device.free(managed.id())?;
        ensure!(!device.is_live(local.id()), "freed buffer is still live");

        Ok(format!(
            "2 x {} bytes filled, base {:#x}, {} of {} bytes free",
            SIZE, base, info.free, info.total
        ))
    }

    async fn graphs(&self) -> anyhow::Result<String> {
        const SIZE: u64 = 4096;
        let buffer = self.device.allocate(SIZE, MemoryKind::Device)?;
        let queue = self.queue()?;

        let session = queue.begin_capture()?;
        queue.fill(buffer.id(), SIZE, 0x11)?;
        let mut graph = session.end()?;
        ensure!(graph.node_count() == 1, "captured {} nodes", graph.node_count());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let frontier = graph.frontier();
        graph.add_host_callback(
            HostCallback::new("count_launch", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            &frontier,
        )?;

        let exec = GraphCompiler::new(Arc::clone(&self.device))
            .with_collector(Arc::clone(&self.collector))
            .compile(&graph)?;
        let launch_id = queue.launch(&exec)?;
        queue.synchronize().await?;

        let observed = calls.load(Ordering::SeqCst);
        ensure!(observed == 1, "host callback ran {} times", observed);
        ensure!(
            buffer.to_vec()?.iter().all(|b| *b == 0x11),
            "graph fill did not reach the buffer"
        );

        exec.destroy();
        self.device.free(buffer.id())?;
        Ok(format!("{} nodes, {} completed", graph.node_count(), launch_id))
    }

    async fn pointer_and_events(&self) -> anyhow::Result<String> {
        const SIZE: u64 = 256;
        let buffer = self.device.allocate(SIZE, MemoryKind::Device)?;

        let attributes = self.device.pointer_attributes(buffer.id())?;
        ensure!(
            attributes.kind == MemoryKind::Device,
            "pointer reports {} memory",
            attributes.kind.as_str()
        );
        ensure!(attributes.size == SIZE, "pointer reports {} bytes", attributes.size);

        let queue = self.queue()?;
        let start = Event::new();
        let end = Event::with_flags(EventFlags::default().with_blocking_sync(true));
        queue.record_event(&start)?;
        queue.fill(buffer.id(), SIZE, 0)?;
        queue.record_event(&end)?;

        end.synchronize().await?;
        ensure!(start.query() && end.query(), "events incomplete after synchronize");
        let elapsed = Event::elapsed(&start, &end)?;
        queue.synchronize().await?;

        self.device.free(buffer.id())?;
        Ok(format!(
            "base {:#x}, events {} -> {} took {} us",
            attributes.base_address,
            start.id(),
            end.id(),
            elapsed.as_micros()
        ))
    }

    async fn kernel_launch(&self) -> anyhow::Result<String> {
        const THREADS: u32 = 64;
        let out = self
            .device
            .allocate(u64::from(THREADS) * 4, MemoryKind::Device)?;

        let kernel = Arc::new(FnKernel::new("store_one", |dims, args| {
            let out = args.buffer(0)?;
            for i in 0..dims.total_threads() as usize {
                out.write_f32(i, 1.0)?;
            }
            Ok(())
        }));
        let attributes = kernel.attributes();
        ensure!(
            attributes.max_threads_per_block >= THREADS,
            "kernel allows only {} threads per block",
            attributes.max_threads_per_block
        );

        let queue = self.queue()?;
        queue.launch_kernel(kernel, LaunchDims::linear(1, THREADS), vec![out.id()])?;
        queue.synchronize().await?;

        let values = out.read_f32s()?;
        if let Some((index, value)) = values.iter().enumerate().find(|(_, v)| **v != 1.0) {
            bail!("element {} is {} after kernel", index, value);
        }

        self.device.free(out.id())?;
        Ok(format!(
            "{} threads, {} registers",
            values.len(),
            attributes.num_regs
        ))
    }

    async fn async_and_stream_ops(&self) -> anyhow::Result<String> {
        const SIZE: usize = 1024;
        let source = self.device.allocate(SIZE as u64, MemoryKind::Device)?;
        let target = self.device.allocate(SIZE as u64, MemoryKind::Device)?;
        let bytes: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();

        let producer = self.queue()?;
        let consumer = self.queue()?;

        producer.upload(source.id(), bytes.clone())?;
        let uploaded = Event::new();
        producer.record_event(&uploaded)?;
        consumer.wait_event(&uploaded)?;
        consumer.copy(source.id(), target.id(), SIZE as u64)?;

        consumer.synchronize().await?;
        producer.synchronize().await?;
        ensure!(
            producer.query() && consumer.query(),
            "queues report pending work"
        );
        ensure!(target.to_vec()? == bytes, "copy ran before upload completed");

        self.device.free(source.id())?;
        self.device.free(target.id())?;
        Ok(format!("{} bytes uploaded on {}, copied on {}", SIZE, producer.id(), consumer.id()))
    }

    async fn host_memory(&self) -> anyhow::Result<String> {
        const SIZE: u64 = 64 * 1024;
        let pinned = self.device.allocate(SIZE, MemoryKind::HostPinned)?;

        let attributes = self.device.pointer_attributes(pinned.id())?;
        ensure!(
            attributes.kind == MemoryKind::HostPinned,
            "pointer reports {} memory",
            attributes.kind.as_str()
        );

        let queue = self.queue()?;
        queue.fill(pinned.id(), SIZE, 0xFF)?;
        queue.synchronize().await?;
        ensure!(
            pinned.to_vec()?.iter().all(|b| *b == 0xFF),
            "pinned allocation was not filled"
        );

        self.device.free(pinned.id())?;
        ensure!(!self.device.is_live(pinned.id()), "freed buffer is still live");
        Ok(format!("{} bytes pinned at {:#x}", SIZE, attributes.base_address))
    }
}

impl fmt::Debug for SmokeSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmokeSuite")
            .field("device", &self.device.properties().name)
            .field("config", &self.config)
            .field("sections", &self.sections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opgraph_core::device::{MemoryDevice, MemoryDeviceConfig};
    use opgraph_core::testing::ChaosConfig;

    #[test]
    fn section_names_round_trip() {
        for section in Section::ALL {
            assert_eq!(section.as_str().parse::<Section>().unwrap(), section);
        }
        assert!("gpu_magic".parse::<Section>().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_sections_pass_on_memory_device() {
        let report = SmokeSuite::new(Arc::new(MemoryDevice::default())).run().await;
        let failures: Vec<_> = report.failures().map(|s| (&s.name, &s.detail)).collect();
        assert!(failures.is_empty(), "failed sections: {:?}", failures);
        assert_eq!(report.sections.len(), Section::ALL.len());
    }

    #[tokio::test]
    async fn selection_keeps_run_order() {
        let report = SmokeSuite::new(Arc::new(MemoryDevice::default()))
            .with_sections([Section::HostMemory, Section::DeviceInfo])
            .run()
            .await;
        let names: Vec<_> = report.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["device_info", "host_memory"]);
    }

    #[tokio::test]
    async fn report_serializes_for_the_cli() {
        let report = SmokeSuite::new(Arc::new(MemoryDevice::default()))
            .with_sections([Section::DeviceInfo])
            .run()
            .await;

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["sections"][0]["name"], "device_info");
        assert_eq!(value["sections"][0]["passed"], true);

        let back: SuiteReport = serde_json::from_value(value).unwrap();
        assert_eq!(back.device, report.device);
        assert!(back.passed());
    }

    #[tokio::test]
    async fn injected_faults_fail_sections() {
        let device = MemoryDevice::new(
            MemoryDeviceConfig::default().with_chaos(ChaosConfig::failing(1.0).with_seed(7)),
        );
        let report = SmokeSuite::new(Arc::new(device))
            .with_sections([Section::DeviceInfo, Section::Memory])
            .run()
            .await;

        assert!(!report.passed());
        assert!(report.section("device_info").unwrap().passed);
        let memory = report.section("memory").unwrap();
        assert!(!memory.passed);
        assert!(memory.detail.contains("E401"));
    }
}
