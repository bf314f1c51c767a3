//! A bucket is the top-level namespace that producers deliver logs into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Bucket metadata row.
///
/// Source objects and their partitioned copies always live in the same
/// bucket; the router never moves data across buckets.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// Bucket name (DNS-style, see `StorageService::ensure_bucket_name_safe`).
    pub name: String,

    pub region: String,

    pub created_at: DateTime<Utc>,
}
