//! In-memory object store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::artifact::ObjectRef;
use crate::ports::objects::{ObjectStore, ObjectStoreError, validate_key};

/// In-memory implementation of ObjectStore
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<ObjectRef, ObjectStoreError> {
        validate_key(key)?;
        let size = bytes.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(ObjectRef {
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(&object.key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(object.key.clone()))
    }
}
