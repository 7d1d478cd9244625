//! In-memory storage backend
//!
//! Default storage implementation using in-memory hashmaps.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use super::{check_key, ObjectStore, ObjectSummary, StorageError, StoredObject};

/// In-memory object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one empty bucket
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        let store = Self::new();
        store.create_bucket(bucket);
        store
    }

    /// Create a bucket if it does not exist
    pub fn create_bucket(&self, bucket: impl Into<String>) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.into())
            .or_default();
    }

    /// Number of objects in a bucket
    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn has_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(bucket))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        check_key(key)?;
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NoSuchBucket(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NoSuchKey(key.to_string()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<ObjectSummary, StorageError> {
        check_key(key)?;
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NoSuchBucket(bucket.to_string()))?;

        let object = StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type,
            body,
            last_modified: Utc::now(),
        };
        let summary = object.summary();
        objects.insert(key.to_string(), object);

        debug!(bucket = %bucket, key = %key, size = summary.size, "Stored object");
        Ok(summary)
    }
}
