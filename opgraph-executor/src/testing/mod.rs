//! Functional smoke suite.
//!
//! [`SmokeSuite`] exercises a device end to end through the public API:
//! allocations, direct queue submissions, events, kernels, and a captured
//! graph with a host callback. Each [`Section`] reports separately so a
//! single broken area does not hide the others.
//!
//! # Example
//!
//! ```ignore
//! use opgraph_executor::testing::SmokeSuite;
//!
//! let report = SmokeSuite::new(device).run().await;
//! for section in report.failures() {
//!     eprintln!("{}: {}", section.name, section.detail);
//! }
//! ```

mod suite;

pub use suite::{Section, SectionReport, SmokeSuite, SuiteReport};
