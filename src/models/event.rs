//! Object-creation notification payloads.
//!
//! Mirrors the subset of the S3 event notification document the router needs:
//!
//! ```json
//! {"Records":[{"eventName":"ObjectCreated:Put",
//!              "s3":{"bucket":{"name":"logs"},"object":{"key":"a/b.gz"}}}]}
//! ```

use crate::models::object::ObjectRef;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationRecord {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectEntity {
    pub key: String,
}

impl NotificationBatch {
    /// Object addresses in delivery order.
    pub fn object_refs(&self) -> Vec<ObjectRef> {
        self.records
            .iter()
            .map(|r| ObjectRef::new(&r.s3.bucket.name, &r.s3.object.key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_notification_document() {
        let body = r#"{
            "Records": [
                {"eventName": "ObjectCreated:Put",
                 "s3": {"bucket": {"name": "logs", "arn": "x"},
                        "object": {"key": "a/E1.2024-03-02-14.x.gz", "size": 10}}},
                {"s3": {"bucket": {"name": "logs"}, "object": {"key": "b"}}}
            ]
        }"#;
        let batch: NotificationBatch = serde_json::from_str(body).unwrap();
        assert_eq!(
            batch.object_refs(),
            vec![
                ObjectRef::new("logs", "a/E1.2024-03-02-14.x.gz"),
                ObjectRef::new("logs", "b"),
            ]
        );
        assert_eq!(batch.records[0].event_name.as_deref(), Some("ObjectCreated:Put"));
    }

    #[test]
    fn missing_records_is_an_empty_batch() {
        let batch: NotificationBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.object_refs().is_empty());
    }
}
