//! Data Transfer Objects for the Orchestration API
//!
//! This module contains DTOs shared by the orchestrator's HTTP layer and the
//! client crate. DTOs are lightweight request/response shapes; the domain
//! types in [`crate::domain`] are what gets persisted.

pub mod batch;
pub mod job;
pub mod page;
