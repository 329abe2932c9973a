//! Tessera Core
//!
//! Core types and engine for the Tessera job orchestration system.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, BatchProgress, etc.)
//! - DTOs: Data transfer objects for the Orchestration API
//! - Ports: Traits for the state store, task queue, object store and executor
//! - Services: Submission, dispatch, batch aggregation and the API facade
//! - Memory: In-memory adapters for every port

pub mod config;
pub mod domain;
pub mod dto;
pub mod error;
pub mod memory;
pub mod ports;
pub mod service;

pub use config::EngineConfig;
pub use error::{OrchestrationError, Result};
