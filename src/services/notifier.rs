//! In-process object-creation notifications.
//!
//! Uploads enqueue the new object's address; a dispatcher drains whatever is
//! pending (up to the batch size) and routes it as one batch.

use crate::{
    models::object::ObjectRef,
    services::router_service::{RouteError, RouterService, settle},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<ObjectRef>,
}

impl Notifier {
    /// Start the dispatcher. It stops once every `Notifier` clone is dropped
    /// and the queue is drained.
    pub fn spawn(router: RouterService, max_batch: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let max_batch = max_batch.max(1);

        let dispatcher = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(max_batch);
            while rx.recv_many(&mut batch, max_batch).await > 0 {
                let objects = std::mem::take(&mut batch);
                debug!("dispatching {} object notifications", objects.len());
                match settle(router.route_batch(objects).await) {
                    Ok(report) => info!(
                        "notification batch settled: {} moved, {} skipped",
                        report.moved.len(),
                        report.skipped.len()
                    ),
                    Err(RouteError::Batch { total, failures }) => {
                        for failure in &failures {
                            error!(
                                key = failure.source_key().unwrap_or_default(),
                                "relocation failed: {}", failure
                            );
                        }
                        error!("{} of {} notifications failed", failures.len(), total);
                    }
                    Err(err) => error!("notification batch failed: {}", err),
                }
            }
        });

        (Self { tx }, dispatcher)
    }

    pub fn notify(&self, object: ObjectRef) {
        if let Err(err) = self.tx.send(object) {
            warn!(key = %err.0.key, "notification dropped, dispatcher has stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::tests as storage;
    use std::sync::Arc;

    #[tokio::test]
    async fn uploads_are_routed() {
        let (svc, _dir) = storage::service().await;
        svc.create_bucket("logs", "local".into()).await.unwrap();
        let key = "cdn/E2ABCDEF.2023-11-05-07.a1b2c3d4.gz";
        storage::put(&svc, "logs", key, b"edge").await;
        storage::put(&svc, "logs", "cdn/readme.txt", b"doc").await;

        let (notifier, dispatcher) = Notifier::spawn(RouterService::new(Arc::new(svc.clone())), 8);
        notifier.notify(ObjectRef::new("logs", key));
        notifier.notify(ObjectRef::new("logs", "cdn/readme.txt"));
        drop(notifier);
        dispatcher.await.unwrap();

        let target = "cf-partitioned-raw/year=2023/month=11/day=05/hour=07/E2ABCDEF.2023-11-05-07.a1b2c3d4.gz";
        assert_eq!(storage::read(&svc, "logs", target).await.unwrap(), b"edge");
        assert!(svc.get_object_metadata("logs", key).await.is_err());
        assert!(svc.get_object_metadata("logs", "cdn/readme.txt").await.is_ok());
    }
}
