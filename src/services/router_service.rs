//! Classification and relocation of freshly delivered log objects.
//!
//! A source key such as `myprefix/aws-waf-logs-2024-03-02-14-abcd1234.log.gz`
//! is classified by the token in front of its embedded `YYYY-MM-DD-HH`
//! timestamp and moved (copy, then delete) to
//! `waf-partitioned-raw/year=2024/month=03/day=02/hour=14/aws-waf-logs-2024-03-02-14-abcd1234.log.gz`.

use crate::{
    models::{object::ObjectRef, partition::PartitionKey, producer::ProducerType},
    services::{object_store::ObjectStore, storage_service::StorageError},
};
use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, error, info};

/// Directory prefix, lazily the shortest token, one non-digit, then
/// `YYYY-MM-DD-HH` and one more non-digit. The token never starts at the
/// beginning of a key that has a `/`.
static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*/(.*?)[^\d](\d{4})-(\d{2})-(\d{2})-(\d{2})[^\d]")
        .expect("key pattern compiles")
});

/// Same shape for keys stored at the bucket root.
static BARE_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)[^\d](\d{4})-(\d{2})-(\d{2})-(\d{2})[^\d]")
        .expect("bare key pattern compiles")
});

/// Where a recognized source object belongs.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub producer: ProducerType,
    pub partition: PartitionKey,
    pub filename: String,
}

impl Classification {
    /// `{code}-partitioned-raw/year=Y/month=M/day=D/hour=H/{filename}`
    pub fn target_key(&self) -> String {
        format!(
            "{}{}/{}",
            self.producer.partitioned_prefix(),
            self.partition.path(),
            self.filename
        )
    }
}

/// Classify an object key. `None` when the key carries no recognizable
/// timestamp or has no filename segment.
pub fn classify(key: &str) -> Option<Classification> {
    let pattern = if key.contains('/') {
        &KEY_PATTERN
    } else {
        &BARE_KEY_PATTERN
    };
    let caps = pattern.captures(key)?;
    let filename = key.rsplit('/').next().filter(|f| !f.is_empty())?;

    Some(Classification {
        producer: ProducerType::from_token(&caps[1]),
        partition: PartitionKey::new(&caps[2], &caps[3], &caps[4], &caps[5]),
        filename: filename.to_string(),
    })
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No embedded timestamp; the object is not an access log.
    Unrecognized,
    /// Already lives under a partitioned prefix.
    AlreadyPartitioned,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to copy `{source_key}` to `{target_key}`: {cause}")]
    Copy {
        source_key: String,
        target_key: String,
        cause: StorageError,
    },
    #[error("copied `{source_key}` to `{target_key}` but could not delete the source: {cause}")]
    Delete {
        source_key: String,
        target_key: String,
        cause: StorageError,
    },
    #[error("routing task for `{source_key}` did not finish: {cause}")]
    Task {
        source_key: String,
        cause: tokio::task::JoinError,
    },
    #[error("{} of {total} objects failed to relocate: {}", .failures.len(), summarize(.failures))]
    Batch {
        total: usize,
        failures: Vec<RouteError>,
    },
}

impl RouteError {
    pub fn source_key(&self) -> Option<&str> {
        match self {
            RouteError::Copy { source_key, .. }
            | RouteError::Delete { source_key, .. }
            | RouteError::Task { source_key, .. } => Some(source_key),
            RouteError::Batch { .. } => None,
        }
    }
}

fn summarize(failures: &[RouteError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Per-object result of one batch.
#[derive(Debug)]
pub enum RouteOutcome {
    Moved {
        object: ObjectRef,
        target_key: String,
        producer: ProducerType,
    },
    Skipped {
        object: ObjectRef,
        reason: SkipReason,
    },
    Failed {
        object: ObjectRef,
        error: RouteError,
    },
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct MovedObject {
    pub bucket: String,
    pub source_key: String,
    pub target_key: String,
    pub producer: ProducerType,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct SkippedObject {
    pub bucket: String,
    pub key: String,
    pub reason: SkipReason,
}

/// Summary of a successfully settled batch.
#[derive(Serialize, Debug, Default)]
pub struct BatchReport {
    pub moved: Vec<MovedObject>,
    pub skipped: Vec<SkippedObject>,
}

/// Settle a batch: every object moved or skipped, otherwise one
/// `RouteError::Batch` carrying each failure.
pub fn settle(outcomes: Vec<RouteOutcome>) -> Result<BatchReport, RouteError> {
    let total = outcomes.len();
    let mut report = BatchReport::default();
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome {
            RouteOutcome::Moved {
                object,
                target_key,
                producer,
            } => report.moved.push(MovedObject {
                bucket: object.bucket,
                source_key: object.key,
                target_key,
                producer,
            }),
            RouteOutcome::Skipped { object, reason } => report.skipped.push(SkippedObject {
                bucket: object.bucket,
                key: object.key,
                reason,
            }),
            RouteOutcome::Failed { error, .. } => failures.push(error),
        }
    }

    if failures.is_empty() {
        Ok(report)
    } else {
        Err(RouteError::Batch { total, failures })
    }
}

/// Relocates log objects into the partitioned namespace of their bucket.
#[derive(Clone)]
pub struct RouterService {
    store: Arc<dyn ObjectStore>,
}

impl RouterService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Classify and move one object.
    pub async fn route_object(&self, object: ObjectRef) -> RouteOutcome {
        let already_partitioned = ProducerType::PROMOTION_ORDER
            .iter()
            .any(|p| object.key.starts_with(&p.partitioned_prefix()));
        if already_partitioned {
            debug!(bucket = %object.bucket, key = %object.key, "object already partitioned");
            return RouteOutcome::Skipped {
                object,
                reason: SkipReason::AlreadyPartitioned,
            };
        }

        let Some(class) = classify(&object.key) else {
            info!(
                bucket = %object.bucket,
                key = %object.key,
                "object key does not look like an access log file, so it will not be moved"
            );
            return RouteOutcome::Skipped {
                object,
                reason: SkipReason::Unrecognized,
            };
        };

        let target_key = class.target_key();
        info!(
            bucket = %object.bucket,
            key = %object.key,
            target = %target_key,
            producer = %class.producer,
            "copying object"
        );

        if let Err(cause) = self
            .store
            .copy_object(&object.bucket, &object.key, &object.bucket, &target_key)
            .await
        {
            error!(bucket = %object.bucket, key = %object.key, "copy failed: {}", cause);
            return RouteOutcome::Failed {
                error: RouteError::Copy {
                    source_key: object.key.clone(),
                    target_key,
                    cause,
                },
                object,
            };
        }

        debug!(bucket = %object.bucket, key = %object.key, "copied, now deleting source");
        if let Err(cause) = self.store.delete_object(&object.bucket, &object.key).await {
            error!(
                bucket = %object.bucket,
                key = %object.key,
                target = %target_key,
                "delete failed after copy, both objects remain: {}",
                cause
            );
            return RouteOutcome::Failed {
                error: RouteError::Delete {
                    source_key: object.key.clone(),
                    target_key,
                    cause,
                },
                object,
            };
        }

        RouteOutcome::Moved {
            object,
            target_key,
            producer: class.producer,
        }
    }

    /// Route every object of a batch concurrently and wait for all of them.
    ///
    /// Outcomes are returned in input order.
    pub async fn route_batch(&self, objects: Vec<ObjectRef>) -> Vec<RouteOutcome> {
        let tasks = objects.into_iter().map(|object| {
            let router = self.clone();
            let handle = tokio::spawn({
                let object = object.clone();
                async move { router.route_object(object).await }
            });
            async move {
                handle.await.unwrap_or_else(|cause| {
                    error!(key = %object.key, "routing task did not finish: {}", cause);
                    RouteOutcome::Failed {
                        error: RouteError::Task {
                            source_key: object.key.clone(),
                            cause,
                        },
                        object,
                    }
                })
            }
        });

        join_all(tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::{StorageResult, tests as storage};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Mutex;

    /// In-memory store with per-key failure injection.
    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<(String, String), Vec<u8>>>,
        copies: Mutex<Vec<(String, String)>>,
        deletes: Mutex<Vec<String>>,
        fail_copy: HashSet<String>,
        fail_delete: HashSet<String>,
    }

    impl MemoryStore {
        async fn with_keys(keys: &[&str]) -> Self {
            let store = Self::default();
            {
                let mut objects = store.objects.lock().await;
                for key in keys {
                    objects.insert(("logs".into(), key.to_string()), key.as_bytes().to_vec());
                }
            }
            store
        }

        async fn contains(&self, key: &str) -> bool {
            self.objects
                .lock()
                .await
                .contains_key(&("logs".to_string(), key.to_string()))
        }
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn copy_object(
            &self,
            src_bucket: &str,
            src_key: &str,
            dst_bucket: &str,
            dst_key: &str,
        ) -> StorageResult<()> {
            self.copies
                .lock()
                .await
                .push((src_key.to_string(), dst_key.to_string()));
            if self.fail_copy.contains(src_key) {
                return Err(StorageError::Io(std::io::Error::other("access denied")));
            }
            let mut objects = self.objects.lock().await;
            let body = objects
                .get(&(src_bucket.to_string(), src_key.to_string()))
                .cloned()
                .ok_or_else(|| not_found(src_bucket, src_key))?;
            objects.insert((dst_bucket.to_string(), dst_key.to_string()), body);
            Ok(())
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
            self.deletes.lock().await.push(key.to_string());
            if self.fail_delete.contains(key) {
                return Err(StorageError::Io(std::io::Error::other("throttled")));
            }
            self.objects
                .lock()
                .await
                .remove(&(bucket.to_string(), key.to_string()))
                .map(|_| ())
                .ok_or_else(|| not_found(bucket, key))
        }
    }

    const WAF_KEY: &str = "myprefix/aws-waf-logs-2024-03-02-14-abcd1234.log.gz";
    const CF_KEY: &str = "cdn/E2ABCDEF.2023-11-05-07.a1b2c3d4.gz";
    const APIG_KEY: &str =
        "apig/2024/01/09/amazon-apigateway-access-1-2024-01-09-00-12-33-6f0e.gz";

    #[test]
    fn classifies_web_acl_key() {
        let class = classify(WAF_KEY).unwrap();
        assert_eq!(class.producer, ProducerType::WebAclLog);
        assert_eq!(class.partition, PartitionKey::new("2024", "03", "02", "14"));
        assert_eq!(class.filename, "aws-waf-logs-2024-03-02-14-abcd1234.log.gz");
        assert_eq!(
            class.target_key(),
            "waf-partitioned-raw/year=2024/month=03/day=02/hour=14/aws-waf-logs-2024-03-02-14-abcd1234.log.gz"
        );
    }

    #[test]
    fn classifies_edge_and_gateway_keys() {
        let cf = classify(CF_KEY).unwrap();
        assert_eq!(cf.producer, ProducerType::EdgeLog);
        assert_eq!(
            cf.target_key(),
            "cf-partitioned-raw/year=2023/month=11/day=05/hour=07/E2ABCDEF.2023-11-05-07.a1b2c3d4.gz"
        );

        let apig = classify(APIG_KEY).unwrap();
        assert_eq!(apig.producer, ProducerType::ApiGatewayLog);
        assert_eq!(apig.partition, PartitionKey::new("2024", "01", "09", "00"));
    }

    #[test]
    fn classification_is_deterministic() {
        for key in [WAF_KEY, CF_KEY, APIG_KEY] {
            assert_eq!(classify(key), classify(key));
        }
    }

    #[test]
    fn first_timestamp_wins() {
        let class = classify("p/E1.2024-03-02-14.2025-01-01-00.gz").unwrap();
        assert_eq!(class.partition, PartitionKey::new("2024", "03", "02", "14"));
    }

    #[test]
    fn key_without_separator_matches() {
        let class = classify("E2ABC.2024-03-02-14.abcd.gz").unwrap();
        assert_eq!(class.producer, ProducerType::EdgeLog);
        assert_eq!(class.filename, "E2ABC.2024-03-02-14.abcd.gz");
    }

    #[test]
    fn short_token_defaults_to_edge() {
        let class = classify("x/am-2024-03-02-14-z.gz").unwrap();
        assert_eq!(class.producer, ProducerType::EdgeLog);
    }

    #[test]
    fn non_matching_keys() {
        for key in [
            "readme.txt",
            "logs/2024/03/02/file.gz",
            "p/E1.2024-03-02-14",
            "p/E1.24-03-02-14.gz",
            "p/E1.2024-03-02-14.x/",
            "exports/2024-03-02-14/data.csv",
            "2024-03-02-14/E1.gz",
        ] {
            assert_eq!(classify(key), None, "{key}");
        }
    }

    #[tokio::test]
    async fn moves_and_deletes_source() {
        let store = Arc::new(MemoryStore::with_keys(&[WAF_KEY]).await);
        let router = RouterService::new(store.clone());

        let outcome = router.route_object(ObjectRef::new("logs", WAF_KEY)).await;
        let RouteOutcome::Moved {
            target_key,
            producer,
            ..
        } = outcome
        else {
            panic!("expected a move");
        };
        assert_eq!(producer, ProducerType::WebAclLog);
        assert!(store.contains(&target_key).await);
        assert!(!store.contains(WAF_KEY).await);
    }

    #[tokio::test]
    async fn unrecognized_key_is_left_alone() {
        let keys = ["notes/readme.txt", "exports/2024-03-02-14/data.csv"];
        let store = Arc::new(MemoryStore::with_keys(&keys).await);
        let router = RouterService::new(store.clone());

        for key in keys {
            let outcome = router.route_object(ObjectRef::new("logs", key)).await;
            assert!(
                matches!(
                    outcome,
                    RouteOutcome::Skipped {
                        reason: SkipReason::Unrecognized,
                        ..
                    }
                ),
                "{key}"
            );
            assert!(store.contains(key).await);
        }
        assert!(store.copies.lock().await.is_empty());
        assert!(store.deletes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn partitioned_key_is_not_moved_onto_itself() {
        let key = "cf-partitioned-raw/year=2023/month=11/day=05/hour=07/E2ABCDEF.2023-11-05-07.a1b2c3d4.gz";
        let store = Arc::new(MemoryStore::with_keys(&[key]).await);
        let router = RouterService::new(store.clone());

        let outcome = router.route_object(ObjectRef::new("logs", key)).await;
        assert!(matches!(
            outcome,
            RouteOutcome::Skipped {
                reason: SkipReason::AlreadyPartitioned,
                ..
            }
        ));
        assert!(store.contains(key).await);
    }

    #[tokio::test]
    async fn copy_failure_skips_delete() {
        let store = Arc::new(MemoryStore {
            fail_copy: HashSet::from([CF_KEY.to_string()]),
            ..MemoryStore::with_keys(&[CF_KEY]).await
        });
        let router = RouterService::new(store.clone());

        let outcome = router.route_object(ObjectRef::new("logs", CF_KEY)).await;
        let RouteOutcome::Failed { error, .. } = outcome else {
            panic!("expected a failure");
        };
        assert!(matches!(error, RouteError::Copy { .. }));
        assert_eq!(error.source_key(), Some(CF_KEY));
        assert!(store.deletes.lock().await.is_empty());
        assert!(store.contains(CF_KEY).await);
    }

    #[tokio::test]
    async fn delete_failure_leaves_both_copies_and_fails() {
        let store = Arc::new(MemoryStore {
            fail_delete: HashSet::from([CF_KEY.to_string()]),
            ..MemoryStore::with_keys(&[CF_KEY]).await
        });
        let router = RouterService::new(store.clone());

        let outcome = router.route_object(ObjectRef::new("logs", CF_KEY)).await;
        assert!(matches!(
            outcome,
            RouteOutcome::Failed {
                error: RouteError::Delete { .. },
                ..
            }
        ));
        assert!(store.contains(CF_KEY).await);
        assert!(
            store
                .contains(&classify(CF_KEY).unwrap().target_key())
                .await
        );
    }

    #[tokio::test]
    async fn malformed_key_does_not_block_batch() {
        let keys = [WAF_KEY, "junk/object", CF_KEY, APIG_KEY];
        for position in 0..keys.len() {
            let mut batch: Vec<&str> = keys.iter().copied().filter(|k| *k != "junk/object").collect();
            batch.insert(position.min(batch.len()), "junk/object");

            let store = Arc::new(MemoryStore::with_keys(&batch).await);
            let router = RouterService::new(store.clone());
            let outcomes = router
                .route_batch(batch.iter().map(|k| ObjectRef::new("logs", *k)).collect())
                .await;
            let report = settle(outcomes).unwrap();

            assert_eq!(report.moved.len(), 3);
            assert_eq!(report.skipped.len(), 1);
            assert_eq!(report.skipped[0].key, "junk/object");
            for moved in &report.moved {
                assert!(!store.contains(&moved.source_key).await);
                assert!(store.contains(&moved.target_key).await);
            }
        }
    }

    #[tokio::test]
    async fn batch_failure_surfaces_after_siblings_finish() {
        let store = Arc::new(MemoryStore {
            fail_copy: HashSet::from([WAF_KEY.to_string()]),
            ..MemoryStore::with_keys(&[WAF_KEY, CF_KEY, APIG_KEY]).await
        });
        let router = RouterService::new(store.clone());

        let outcomes = router
            .route_batch(
                [WAF_KEY, CF_KEY, APIG_KEY]
                    .iter()
                    .map(|k| ObjectRef::new("logs", *k))
                    .collect(),
            )
            .await;
        assert!(matches!(outcomes[0], RouteOutcome::Failed { .. }));
        assert!(matches!(outcomes[1], RouteOutcome::Moved { .. }));
        assert!(matches!(outcomes[2], RouteOutcome::Moved { .. }));

        let err = settle(outcomes).unwrap_err();
        let RouteError::Batch { total, failures } = &err else {
            panic!("expected a batch error");
        };
        assert_eq!(*total, 3);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source_key(), Some(WAF_KEY));
        assert!(err.to_string().contains(WAF_KEY));
        assert!(!store.contains(CF_KEY).await);
        assert!(!store.contains(APIG_KEY).await);
    }

    #[tokio::test]
    async fn round_trip_against_local_store() {
        let (svc, _dir) = storage::service().await;
        svc.create_bucket("logs", "local".into()).await.unwrap();
        storage::put(&svc, "logs", WAF_KEY, b"\x1f\x8b gzip bytes").await;

        let router = RouterService::new(Arc::new(svc.clone()));
        let report = settle(
            router
                .route_batch(vec![ObjectRef::new("logs", WAF_KEY)])
                .await,
        )
        .unwrap();

        let target = &report.moved[0].target_key;
        assert_eq!(
            storage::read(&svc, "logs", target).await.unwrap(),
            b"\x1f\x8b gzip bytes"
        );
        assert!(matches!(
            svc.get_object_metadata("logs", WAF_KEY).await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }
}
