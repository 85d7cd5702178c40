use anyhow::Result;
use axum::Router;
use object_copier::{
    AppState,
    config::AppConfig,
    routes,
    services::{database, storage_service::StorageService},
};
use std::{io::ErrorKind, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    let copy_options = cfg.copy_options()?;

    tracing::info!("Starting object-copier with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !fs::try_exists(&cfg.storage_dir).await? {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let db = Arc::new(database::connect(&cfg.database_url, 5).await?);

    // --- Schema (idempotent); --migrate stops here ---
    database::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let storage = StorageService::new(db, cfg.storage_dir.clone());
    let state = AppState::new(storage, copy_options);

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

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

    tracing::info!(
        "Server listening on http://{} ({} copy workers, {} byte minimum parts)",
        listener.local_addr()?,
        copy_options.worker_count(),
        copy_options.min_part_size()
    );
    axum::serve(listener, app).await?;

    Ok(())
}
