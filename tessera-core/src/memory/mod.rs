//! In-memory adapters
//!
//! Full-semantics implementations of every port, backed by process memory.
//! They emulate an atomic store with a mutex per adapter and back the tests
//! of the engine and of the crates built on it. The scripted executor is a
//! test double and only exists under `cfg(test)` or the `testing` feature.

#[cfg(any(test, feature = "testing"))]
mod executor;
mod objects;
mod queue;
mod store;

#[cfg(any(test, feature = "testing"))]
pub use executor::ScriptedExecutor;
pub use objects::MemoryObjectStore;
pub use queue::MemoryTaskQueue;
pub use store::MemoryStateStore;
