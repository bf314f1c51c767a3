//! src/services/storage_service.rs
//!
//! StorageService is the local object store that producers deliver logs into
//! and that the router relocates them within. Metadata lives in SQLite and
//! payloads on disk, sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::models::{bucket::Bucket, object::Object};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the S3-like operations the pipeline needs:
/// - put / get / head / delete an object
/// - server-side copy between keys (used by the router)
/// - create / delete buckets
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const OBJECT_COLUMNS: &str =
    "id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified, is_deleted";

impl StorageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject keys that are empty, too long, absolute, contain `..`, or carry
    /// control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StorageError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - starts and ends with a letter or digit
    /// - no consecutive dots
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }

        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// First two bytes of MD5(bucket/key) as lowercase hex, used as
    /// directory shards.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, region, created_at
             FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Directory that will hold `file_path`, created if needed, plus a fresh
    /// temp file path inside it.
    async fn staging_path(file_path: &Path) -> StorageResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    /// Move a fully written temp file over the final payload path.
    async fn commit_staged(tmp_path: &Path, file_path: &Path) -> StorageResult<()> {
        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Insert or overwrite the metadata row for `key`.
    async fn upsert_object(
        &self,
        bucket: &Bucket,
        key: &str,
        content_type: Option<String>,
        size_bytes: i64,
        etag: &str,
    ) -> Result<Object, sqlx::Error> {
        let filename = key.rsplit('/').next().unwrap_or(key).to_string();

        sqlx::query_as::<_, Object>(&format!(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, filename, content_type, size_bytes,
                etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(&filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    /// Stream an object to disk and record its metadata.
    ///
    /// Bytes go to a temp file (MD5 and size computed on the way), are
    /// fsynced, then renamed into place. Existing keys are overwritten.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let tmp_path = Self::staging_path(&file_path).await?;
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    size_bytes += chunk.len() as i64;
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await
        {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        Self::commit_staged(&tmp_path, &file_path).await?;

        let etag = format!("{:x}", digest.compute());
        match self
            .upsert_object(&bucket_rec, key, content_type, size_bytes, &etag)
            .await
        {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Server-side copy. The destination gets the source's payload, etag and
    /// content type; an existing destination is overwritten.
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<Object> {
        self.ensure_key_safe(src_key)?;
        self.ensure_key_safe(dst_key)?;
        let src_rec = self.fetch_bucket(src_bucket).await?;
        let dst_rec = if src_bucket == dst_bucket {
            src_rec.clone()
        } else {
            self.fetch_bucket(dst_bucket).await?
        };
        let source = self.fetch_object(&src_rec, src_key).await?;

        let src_path = self.object_path(&src_rec.name, src_key);
        let dst_path = self.object_path(&dst_rec.name, dst_key);
        if src_path == dst_path {
            return Ok(source);
        }

        let tmp_path = Self::staging_path(&dst_path).await?;
        if let Err(err) = fs::copy(&src_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                }
            } else {
                StorageError::Io(err)
            });
        }
        File::open(&tmp_path).await?.sync_all().await?;
        Self::commit_staged(&tmp_path, &dst_path).await?;

        let etag = source.etag.clone().unwrap_or_default();
        let copied = self
            .upsert_object(
                &dst_rec,
                dst_key,
                source.content_type.clone(),
                source.size_bytes,
                &etag,
            )
            .await;

        match copied {
            Ok(obj) => {
                debug!("copied {}/{} to {}/{}", src_bucket, src_key, dst_bucket, dst_key);
                Ok(obj)
            }
            Err(err) => {
                let _ = fs::remove_file(&dst_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Metadata plus an open payload handle, ready for streaming out.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(Object, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    /// Soft-delete an object and remove its payload.
    ///
    /// - Sets `is_deleted = 1`
    /// - Deletes the physical file
    /// - Prunes empty shard directories
    ///
    /// Deleting an already deleted object returns ObjectNotFound.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let result = sqlx::query(
            "UPDATE objects SET is_deleted = 1 WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket_rec.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(object)
    }

    pub async fn create_bucket(&self, name: &str, region: String) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            region: region.to_lowercase(),
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Remove the bucket row, its object rows, and its directory.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(name)?;
        let bucket_rec = self.fetch_bucket(name).await?;

        sqlx::query("DELETE FROM objects WHERE bucket_id = ?")
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        let bucket_path = self.bucket_root(name);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }

        Ok(())
    }

    /// Remove empty directories from `start` upward, stopping below `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
                    ) =>
                {
                    break;
                }
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::memory_pool;
    use tempfile::TempDir;

    pub(crate) async fn service() -> (StorageService, TempDir) {
        let dir = TempDir::new().unwrap();
        let svc = StorageService::new(Arc::new(memory_pool().await), dir.path());
        (svc, dir)
    }

    pub(crate) async fn read(svc: &StorageService, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        let (_, mut file) = svc.get_object_reader(bucket, key).await?;
        let mut body = Vec::new();
        file.read_to_end(&mut body).await?;
        Ok(body)
    }

    pub(crate) async fn put(svc: &StorageService, bucket: &str, key: &str, body: &'static [u8]) {
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(Bytes::from_static(body)) });
        svc.put_object_stream(bucket, key, Some("application/gzip".into()), stream)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_then_read() {
        let (svc, _dir) = service().await;
        svc.create_bucket("logs", "local".into()).await.unwrap();
        put(&svc, "logs", "a/b/c.gz", b"hello").await;

        let meta = svc.get_object_metadata("logs", "a/b/c.gz").await.unwrap();
        assert_eq!(meta.filename, "c.gz");
        assert_eq!(meta.size_bytes, 5);
        assert_eq!(meta.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(read(&svc, "logs", "a/b/c.gz").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn copy_preserves_payload_and_overwrites() {
        let (svc, _dir) = service().await;
        svc.create_bucket("logs", "local".into()).await.unwrap();
        put(&svc, "logs", "src.gz", b"payload").await;
        put(&svc, "logs", "dst/x.gz", b"old").await;

        let copied = svc
            .copy_object("logs", "src.gz", "logs", "dst/x.gz")
            .await
            .unwrap();
        assert_eq!(copied.size_bytes, 7);
        assert_eq!(copied.content_type.as_deref(), Some("application/gzip"));
        assert_eq!(read(&svc, "logs", "dst/x.gz").await.unwrap(), b"payload");
        assert_eq!(read(&svc, "logs", "src.gz").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let (svc, _dir) = service().await;
        svc.create_bucket("logs", "local".into()).await.unwrap();
        let err = svc
            .copy_object("logs", "missing.gz", "logs", "dst.gz")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let (svc, _dir) = service().await;
        svc.create_bucket("logs", "local".into()).await.unwrap();
        put(&svc, "logs", "k.gz", b"x").await;

        svc.delete_object("logs", "k.gz").await.unwrap();
        assert!(matches!(
            read(&svc, "logs", "k.gz").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            svc.delete_object("logs", "k.gz").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_unsafe_names() {
        let (svc, _dir) = service().await;
        assert!(matches!(
            svc.create_bucket("Bad_Name", "local".into()).await,
            Err(StorageError::InvalidBucketName { .. })
        ));
        svc.create_bucket("logs", "local".into()).await.unwrap();
        assert!(matches!(
            svc.create_bucket("logs", "local".into()).await,
            Err(StorageError::BucketAlreadyExists(_))
        ));
        for key in ["", "/abs", "a/../b", "tab\there"] {
            assert!(matches!(
                svc.get_object_metadata("logs", key).await,
                Err(StorageError::InvalidObjectKey(_))
            ));
        }
    }
}
