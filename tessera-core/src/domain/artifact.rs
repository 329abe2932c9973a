//! Object-store artifact references

use serde::{Deserialize, Serialize};

/// Reference to a blob written to the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Store-relative key, e.g. `jobs/{job_id}/model_0.cif`
    pub key: String,
    /// Size of the stored blob in bytes
    pub size: u64,
}

/// A named artifact produced by a job execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path reported by the executor, relative to the job
    pub path: String,
    pub object: ObjectRef,
}
