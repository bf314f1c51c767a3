//! Objects held by the local store and references to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Metadata row of a stored object. Payload bytes live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    pub id: Uuid,

    /// Parent bucket.
    pub bucket_id: Uuid,

    /// Full object key, e.g. `cf-partitioned-raw/year=2024/.../E2AB.2024-03-02-14.x.gz`.
    pub key: String,

    /// Final path segment of `key`.
    pub filename: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    pub last_modified: DateTime<Utc>,

    /// Soft-delete marker.
    pub is_deleted: bool,
}

/// `(bucket, key)` address of an object, as carried by creation notifications.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}
