//! Chaos testing utilities.
//!
//! Provides tools for testing failure handling by injecting device faults
//! and latency into primitive operations.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Configuration for chaos testing.
///
/// # Example
///
/// ```
/// use opgraph_core::testing::{ChaosConfig, ChaosFault};
///
/// let config = ChaosConfig::new()
///     .with_seed(42)
///     .with_fault_rate(0.1)  // 10% chance of fault
///     .with_max_latency_ms(50)
///     .with_fault(ChaosFault::KernelFault { probability: 0.5 })
///     .with_fault(ChaosFault::FillFault { probability: 0.2 });
/// ```
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Base probability of injecting any fault (0.0 - 1.0).
    pub fault_rate: f64,
    /// Maximum latency to inject in milliseconds.
    pub max_latency_ms: u64,
    /// Specific faults to inject.
    pub faults: Vec<ChaosFault>,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl ChaosConfig {
    /// Create a new chaos configuration with no faults.
    pub fn new() -> Self {
        Self {
            fault_rate: 0.0,
            max_latency_ms: 0,
            faults: Vec::new(),
            seed: 0,
        }
    }

    /// Create a configuration where every injected fault fails the operation.
    ///
    /// Each operation kind has its own fault with probability 1.0, so
    /// `fault_rate` alone decides how often an operation fails.
    pub fn failing(fault_rate: f64) -> Self {
        Self::new()
            .with_fault_rate(fault_rate)
            .with_fault(ChaosFault::KernelFault { probability: 1.0 })
            .with_fault(ChaosFault::CopyFault { probability: 1.0 })
            .with_fault(ChaosFault::FillFault { probability: 1.0 })
    }

    /// Create a configuration with aggressive fault injection.
    ///
    /// Useful for stress testing.
    pub fn aggressive() -> Self {
        Self {
            fault_rate: 0.3,
            max_latency_ms: 100,
            faults: vec![
                ChaosFault::KernelFault { probability: 0.2 },
                ChaosFault::CopyFault { probability: 0.2 },
                ChaosFault::FillFault { probability: 0.2 },
                ChaosFault::SlowOperation {
                    probability: 0.2,
                    latency_ms: 50,
                },
            ],
            seed: 0,
        }
    }

    /// Create a configuration with mild fault injection.
    pub fn mild() -> Self {
        Self {
            fault_rate: 0.05,
            max_latency_ms: 20,
            faults: vec![
                ChaosFault::KernelFault { probability: 0.01 },
                ChaosFault::SlowOperation {
                    probability: 0.05,
                    latency_ms: 10,
                },
            ],
            seed: 0,
        }
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the base fault rate.
    pub fn with_fault_rate(mut self, rate: f64) -> Self {
        self.fault_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the maximum latency in milliseconds.
    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.max_latency_ms = ms;
        self
    }

    /// Add a fault type.
    pub fn with_fault(mut self, fault: ChaosFault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Clear all faults.
    pub fn without_faults(mut self) -> Self {
        self.faults.clear();
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, PartialEq)]
pub enum ChaosFault {
    /// A kernel launch traps.
    KernelFault {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
    },

    /// A copy or upload fails.
    CopyFault {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
    },

    /// A memory fill fails.
    FillFault {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
    },

    /// The operation succeeds after a delay.
    SlowOperation {
        /// Probability of this fault (0.0 - 1.0).
        probability: f64,
        /// Latency to add in milliseconds.
        latency_ms: u64,
    },
}

impl ChaosFault {
    /// Get the probability of this fault.
    pub fn probability(&self) -> f64 {
        match self {
            Self::KernelFault { probability } => *probability,
            Self::CopyFault { probability } => *probability,
            Self::FillFault { probability } => *probability,
            Self::SlowOperation { probability, .. } => *probability,
        }
    }

    /// Get the name of this fault type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::KernelFault { .. } => "kernel_fault",
            Self::CopyFault { .. } => "copy_fault",
            Self::FillFault { .. } => "fill_fault",
            Self::SlowOperation { .. } => "slow_operation",
        }
    }

    /// Whether this fault can affect an operation of the given kind
    /// (`"fill"`, `"copy"`, `"upload"` or `"kernel"`).
    pub fn applies_to(&self, operation: &str) -> bool {
        match self {
            Self::KernelFault { .. } => operation == "kernel",
            Self::CopyFault { .. } => operation == "copy" || operation == "upload",
            Self::FillFault { .. } => operation == "fill",
            Self::SlowOperation { .. } => true,
        }
    }
}

/// Engine for injecting chaos during tests.
///
/// Thread-safe and can be shared across worker threads.
///
/// # Example
///
/// ```
/// use opgraph_core::testing::{ChaosConfig, ChaosEngine, ChaosFault};
///
/// let config = ChaosConfig::new()
///     .with_seed(42)
///     .with_fault_rate(0.1)
///     .with_fault(ChaosFault::CopyFault { probability: 0.05 });
///
/// let engine = ChaosEngine::new(config);
///
/// if engine.should_inject() {
///     if let Some(fault) = engine.select_fault() {
///         // Handle the fault
///         let _ = fault.name();
///     }
/// }
/// ```
pub struct ChaosEngine {
    config: ChaosConfig,
    rng: parking_lot::Mutex<StdRng>,
    injection_count: AtomicU64,
}

impl ChaosEngine {
    /// Create a new chaos engine with the given configuration.
    pub fn new(config: ChaosConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: parking_lot::Mutex::new(rng),
            injection_count: AtomicU64::new(0),
        }
    }

    /// Check if a fault should be injected based on the base fault rate.
    pub fn should_inject(&self) -> bool {
        if self.config.fault_rate <= 0.0 {
            return false;
        }
        self.rng.lock().r#gen::<f64>() < self.config.fault_rate
    }

    /// Select a fault to inject based on individual probabilities.
    ///
    /// Returns `None` if no fault should be injected.
    pub fn select_fault(&self) -> Option<ChaosFault> {
        self.select_fault_where(|_| true)
    }

    /// Select a fault among those accepted by `accept`.
    ///
    /// Faults rejected by `accept` are skipped without consuming randomness.
    pub fn select_fault_where(&self, accept: impl Fn(&ChaosFault) -> bool) -> Option<ChaosFault> {
        if self.config.faults.is_empty() {
            return None;
        }

        let mut rng = self.rng.lock();

        for fault in self.config.faults.iter().filter(|f| accept(f)) {
            if rng.r#gen::<f64>() < fault.probability() {
                self.injection_count.fetch_add(1, Ordering::SeqCst);
                return Some(fault.clone());
            }
        }

        None
    }

    /// Get a random latency to inject.
    ///
    /// Returns a duration between 0 and `max_latency_ms`.
    pub fn random_latency(&self) -> Duration {
        if self.config.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let ms = self.rng.lock().gen_range(0..=self.config.max_latency_ms);
        Duration::from_millis(ms)
    }

    /// Get the number of faults injected so far.
    pub fn injection_count(&self) -> u64 {
        self.injection_count.load(Ordering::SeqCst)
    }

    /// Reset the injection count.
    pub fn reset_count(&self) {
        self.injection_count.store(0, Ordering::SeqCst);
    }

    /// Reset the RNG to its initial state.
    pub fn reset(&self) {
        *self.rng.lock() = StdRng::seed_from_u64(self.config.seed);
        self.reset_count();
    }

    /// Check if chaos injection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.fault_rate > 0.0 || !self.config.faults.is_empty()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Convenience method: maybe inject latency.
    ///
    /// Returns the duration to sleep, or zero if no latency should be injected.
    pub fn maybe_latency(&self) -> Duration {
        if self.should_inject() {
            self.random_latency()
        } else {
            Duration::ZERO
        }
    }

    /// Convenience method: maybe fail with a fault.
    ///
    /// Returns `Ok(())` if no fault, or the fault if one should be injected.
    pub fn maybe_fail(&self) -> Result<(), ChaosFault> {
        if self.should_inject() {
            if let Some(fault) = self.select_fault() {
                return Err(fault);
            }
        }
        Ok(())
    }

    /// Maybe fail an operation of the given kind.
    ///
    /// Only faults that [apply](ChaosFault::applies_to) to `operation` are
    /// considered.
    pub fn maybe_fail_operation(&self, operation: &str) -> Result<(), ChaosFault> {
        if self.should_inject() {
            if let Some(fault) = self.select_fault_where(|f| f.applies_to(operation)) {
                return Err(fault);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChaosEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosEngine")
            .field("config", &self.config)
            .field("injection_count", &self.injection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chaos_disabled_by_default() {
        let engine = ChaosEngine::new(ChaosConfig::new());

        for _ in 0..100 {
            assert!(!engine.should_inject());
        }
        assert!(!engine.is_enabled());
    }

    #[test]
    fn chaos_deterministic_with_seed() {
        let config = ChaosConfig::new().with_seed(42).with_fault_rate(0.5);

        let engine1 = ChaosEngine::new(config.clone());
        let engine2 = ChaosEngine::new(config);

        let results1: Vec<bool> = (0..20).map(|_| engine1.should_inject()).collect();
        let results2: Vec<bool> = (0..20).map(|_| engine2.should_inject()).collect();

        assert_eq!(results1, results2);
    }

    #[test]
    fn chaos_select_fault() {
        let config = ChaosConfig::new()
            .with_seed(42)
            .with_fault(ChaosFault::KernelFault { probability: 0.5 })
            .with_fault(ChaosFault::FillFault { probability: 0.5 });

        let engine = ChaosEngine::new(config);

        let got_fault = (0..100).any(|_| engine.select_fault().is_some());
        assert!(got_fault);
    }

    #[test]
    fn chaos_fault_applicability() {
        let kernel = ChaosFault::KernelFault { probability: 1.0 };
        let copy = ChaosFault::CopyFault { probability: 1.0 };
        let slow = ChaosFault::SlowOperation {
            probability: 1.0,
            latency_ms: 1,
        };

        assert!(kernel.applies_to("kernel"));
        assert!(!kernel.applies_to("fill"));
        assert!(copy.applies_to("upload"));
        assert!(slow.applies_to("fill"));
    }

    #[test]
    fn chaos_failing_matches_operation_kind() {
        let engine = ChaosEngine::new(ChaosConfig::failing(1.0).with_seed(7));

        let fault = engine.maybe_fail_operation("fill").unwrap_err();
        assert_eq!(fault.name(), "fill_fault");

        let fault = engine.maybe_fail_operation("kernel").unwrap_err();
        assert_eq!(fault.name(), "kernel_fault");
    }

    #[test]
    fn chaos_random_latency() {
        let config = ChaosConfig::new().with_seed(42).with_max_latency_ms(100);

        let engine = ChaosEngine::new(config);

        for _ in 0..10 {
            let latency = engine.random_latency();
            assert!(latency <= Duration::from_millis(100));
        }
    }

    #[test]
    fn chaos_reset() {
        let config = ChaosConfig::new().with_seed(42).with_fault_rate(0.5);

        let engine = ChaosEngine::new(config);

        let first_run: Vec<bool> = (0..10).map(|_| engine.should_inject()).collect();

        engine.reset();

        let second_run: Vec<bool> = (0..10).map(|_| engine.should_inject()).collect();

        assert_eq!(first_run, second_run);
    }

    #[test]
    fn chaos_injection_count() {
        let config = ChaosConfig::new()
            .with_seed(42)
            .with_fault(ChaosFault::CopyFault { probability: 1.0 });

        let engine = ChaosEngine::new(config);

        assert_eq!(engine.injection_count(), 0);

        engine.select_fault();
        assert_eq!(engine.injection_count(), 1);

        engine.select_fault();
        assert_eq!(engine.injection_count(), 2);

        engine.reset_count();
        assert_eq!(engine.injection_count(), 0);
    }

    #[test]
    fn chaos_maybe_fail() {
        let config = ChaosConfig::new()
            .with_seed(42)
            .with_fault_rate(1.0)
            .with_fault(ChaosFault::KernelFault { probability: 1.0 });

        let engine = ChaosEngine::new(config);

        let result = engine.maybe_fail();
        assert!(matches!(result, Err(ChaosFault::KernelFault { .. })));
    }
}
