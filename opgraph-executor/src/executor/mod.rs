//! Graph launch execution.
//!
//! A launch runs on the worker of the queue it was submitted to, so it is
//! ordered after everything submitted to that queue before it and before
//! everything submitted after it. Inside the launch, nodes run as soon as
//! their predecessors have completed.

mod run;

pub(crate) use run::{execute_work, run_launch};
