//! The object-storage surface the router depends on.

use crate::services::storage_service::{StorageResult, StorageService};
use async_trait::async_trait;

/// Server-side copy and delete, the two primitives a relocation needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy `src_bucket/src_key` to `dst_bucket/dst_key`, overwriting any
    /// existing destination.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        StorageService::copy_object(self, src_bucket, src_key, dst_bucket, dst_key)
            .await
            .map(|_| ())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        StorageService::delete_object(self, bucket, key)
            .await
            .map(|_| ())
    }
}
