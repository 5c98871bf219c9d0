//! Recording queue submissions into graphs.
//!
//! [`Queue::begin_capture`](crate::queue::Queue::begin_capture) switches a
//! queue into capture mode and returns a [`CaptureSession`]. Submissions to
//! the queue then become graph nodes, each depending on the previous one.
//! Other queues can [`join`](CaptureSession::join) the capture; events
//! recorded and waited on inside the capture become edges between the
//! queues' chains.
//!
//! Anything that needs captured work to actually have run (synchronizing a
//! capturing queue, synchronizing or waiting on one of its events from
//! outside, launching a graph from it) cannot be recorded. It invalidates
//! the capture, and ending the capture then fails with
//! [`OpGraphError::CaptureAborted`](opgraph_core::OpGraphError::CaptureAborted).

mod recorder;
mod session;

pub(crate) use recorder::CaptureRecorder;
pub use session::CaptureSession;
