//! Object storage abstraction for the isolation plane
//!
//! Buckets hold objects under every tenant's prefix. The store itself knows
//! nothing about tenants; isolation is enforced before any call reaches it.

pub mod memory;

pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No such bucket: {0}")]
    NoSuchBucket(String),

    #[error("No such key: {0}")]
    NoSuchKey(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    /// Metadata without the body
    pub fn summary(&self) -> ObjectSummary {
        ObjectSummary {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            size: self.body.len(),
            content_type: self.content_type.clone(),
            last_modified: self.last_modified,
        }
    }
}

/// Object metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub bucket: String,
    pub key: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Storage backend trait
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Whether a bucket exists
    async fn has_bucket(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Fetch an object
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;

    /// Create or replace an object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<ObjectSummary, StorageError>;
}

/// Reject keys that are empty or not relative
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.len() > 1024 {
        return Err(StorageError::InvalidKey(key.escape_debug().to_string()));
    }
    Ok(())
}
