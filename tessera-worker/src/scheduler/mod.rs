//! Scheduler layer for the worker
//!
//! Runs the consumers that lease dispatch messages and hand them to the
//! engine's dispatcher.

pub mod poller;

pub use poller::JobPoller;
