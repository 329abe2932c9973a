//! Core domain types
//!
//! This module contains the core domain structures used across Tessera services.
//! These types represent the fundamental business entities and are shared between
//! the orchestrator (submission and queries) and workers (dispatch and aggregation).

pub mod artifact;
pub mod batch;
pub mod job;
