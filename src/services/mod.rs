pub mod notifier;
pub mod object_store;
pub mod promoter_service;
pub mod query_engine;
pub mod router_service;
pub mod scheduler;
pub mod sqlite_engine;
pub mod storage_service;
