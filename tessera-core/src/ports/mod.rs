//! Collaborator ports
//!
//! The engine never talks to a database, queue broker, blob store or GPU
//! executor directly. Each collaborator sits behind one of these traits so
//! the same services run against PostgreSQL in production and the in-memory
//! adapters in tests.
//!
//! All ports are trait-based and consumed as `Arc<dyn Port>`.

pub mod executor;
pub mod objects;
pub mod queue;
pub mod store;

// Re-export traits
pub use executor::ComputeExecutor;
pub use objects::ObjectStore;
pub use queue::TaskQueue;
pub use store::StateStore;

/// Boxed error used by adapters to carry backend-specific failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
