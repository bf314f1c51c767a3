use crate::services::{
    notifier::Notifier, promoter_service::PromoterService, router_service::RouterService,
    storage_service::StorageService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub warehouse: Arc<SqlitePool>,
    pub router: RouterService,
    pub promoter: PromoterService,
    /// Present when uploads should be routed as they arrive.
    pub notifier: Option<Notifier>,
}
