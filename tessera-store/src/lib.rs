//! Tessera Store
//!
//! Production adapters for the engine ports:
//! - [`PgStateStore`]: job records in PostgreSQL
//! - [`PgTaskQueue`]: dispatch messages in a PostgreSQL table leased with
//!   `FOR UPDATE SKIP LOCKED`
//! - [`FsObjectStore`]: results and artifacts on a local or mounted filesystem

pub mod db;
pub mod job;
pub mod objects;
pub mod queue;

pub use job::PgStateStore;
pub use objects::FsObjectStore;
pub use queue::PgTaskQueue;
pub use sqlx::PgPool;
