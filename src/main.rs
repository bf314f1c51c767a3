use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    notifier::Notifier, promoter_service::PromoterService, router_service::RouterService,
    scheduler, sqlite_engine::SqliteQueryEngine, storage_service::StorageService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting log-partitioner with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Databases ---
    let meta_db = Arc::new(db::connect(&cfg.database_url, 5).await?);
    db::run_migrations(&meta_db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }
    let warehouse = Arc::new(db::connect(&cfg.warehouse_url, 5).await?);

    // --- Services ---
    let storage = StorageService::new(meta_db, cfg.storage_dir.clone());
    let router = RouterService::new(Arc::new(storage.clone()));
    let engine = SqliteQueryEngine::new(warehouse.clone());
    let promoter = PromoterService::new(Arc::new(engine), cfg.promoter.clone());

    let notifier = cfg.route_on_upload.then(|| {
        let (notifier, _dispatcher) = Notifier::spawn(router.clone(), cfg.notify_batch_size);
        notifier
    });

    if let Some(period) = cfg.promote_interval {
        scheduler::spawn(promoter.clone(), period);
    } else {
        tracing::info!("Scheduled promotions disabled");
    }

    let app: Router = routes::routes::routes().with_state(state::AppState {
        storage,
        warehouse,
        router,
        promoter,
        notifier,
    });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
