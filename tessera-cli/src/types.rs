//! Common types used across CLI modules

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::Value as JsonValue;
use tessera_core::domain::job::{JobKind, JobStatus};
use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone)]
pub enum IdOrPrefix {
    /// Full UUID
    Full(Uuid),
    /// Prefix that should uniquely identify a job
    Prefix(String),
}

impl IdOrPrefix {
    /// Parse a string into an IdOrPrefix
    ///
    /// Attempts to parse as a full UUID first, otherwise treats as a prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.to_lowercase()),
        }
    }

    /// Get the UUID if this is a full ID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

/// Status filter accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
}

impl From<StatusArg> for JobStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => JobStatus::Pending,
            StatusArg::Queued => JobStatus::Queued,
            StatusArg::Running => JobStatus::Running,
            StatusArg::Completed => JobStatus::Completed,
            StatusArg::Failed => JobStatus::Failed,
            StatusArg::PartiallyCompleted => JobStatus::PartiallyCompleted,
            StatusArg::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Kind filter accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Individual,
    Batch,
    Child,
}

impl From<KindArg> for JobKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Individual => JobKind::Individual,
            KindArg::Batch => JobKind::BatchParent,
            KindArg::Child => JobKind::BatchChild,
        }
    }
}

/// Reads a JSON argument given inline or as `@path/to/file.json`
pub fn read_json_arg(arg: &str) -> Result<JsonValue> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path))?,
        None => arg.to_string(),
    };

    serde_json::from_str(&text).context("Argument is not valid JSON")
}
