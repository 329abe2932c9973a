//! Object store port

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::artifact::ObjectRef;
use crate::ports::BoxError;

/// Errors raised by object store adapters
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Durable blob storage for large results and artifacts
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key`, replacing any previous blob
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<ObjectRef, ObjectStoreError>;

    /// Reads a blob back
    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>, ObjectStoreError>;
}

/// Builds the key of a job-scoped object
///
/// Rejects paths that are absolute, empty, or that would escape the job's
/// prefix.
pub fn job_object_key(job_id: Uuid, path: &str) -> Result<String, ObjectStoreError> {
    validate_key(path)?;
    Ok(format!("jobs/{}/{}", job_id, path))
}

/// Checks that every `/`-separated segment is a plain name
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let plain = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if plain {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_object_key() {
        let id = Uuid::new_v4();
        let key = job_object_key(id, "models/model_0.cif").unwrap();
        assert_eq!(key, format!("jobs/{}/models/model_0.cif", id));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let id = Uuid::new_v4();
        assert!(job_object_key(id, "../secrets").is_err());
        assert!(job_object_key(id, "/etc/passwd").is_err());
        assert!(job_object_key(id, "a//b").is_err());
        assert!(job_object_key(id, "").is_err());
        assert!(job_object_key(id, "a\\b").is_err());
    }
}
