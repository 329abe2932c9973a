//! Filesystem object store
//!
//! Stores each object as a file under a root directory. Writes go to a
//! temporary sibling first and are renamed into place, so readers never see
//! a partial object.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use tessera_core::domain::artifact::ObjectRef;
use tessera_core::ports::objects::{ObjectStore, ObjectStoreError, validate_key};

/// Objects as files below `root`
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<ObjectRef, ObjectStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size = bytes.len() as u64;
        let staging = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        tracing::debug!("Stored object {} ({} bytes)", key, size);

        Ok(ObjectRef {
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(&object.key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(object.key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
