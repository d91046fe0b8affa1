mod api;
mod batch;
mod chunk;
mod config;
mod db;
mod error;
mod history;
mod ledger;
mod remote;
#[cfg(test)]
mod testutil;
mod transfer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::TransferConfig;
use ledger::Ledger;
use remote::HttpChannelClient;
use transfer::Orchestrator;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chanvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get database path from environment or use default
    let db_path = std::env::var("CHANVAULT_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("chanvault").join("chanvault.db"));

    let db = db::init_database(&db_path)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database initialized at {:?}", db_path);

    let ledger = Ledger::new(db);
    let client = Arc::new(HttpChannelClient::new(
        std::env::var("CHANVAULT_PLATFORM_API").ok(),
    ));
    let orchestrator = Orchestrator::new(ledger.clone(), client);

    let download_dir = std::env::var("CHANVAULT_DOWNLOAD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("chanvault").join("downloads"));

    let transfer_config = TransferConfig::default();
    let body_limit = transfer_config.max_file_size as usize;
    let state = Arc::new(AppState::new(
        ledger,
        orchestrator,
        transfer_config,
        std::env::var("CHANVAULT_BOT_TOKEN").ok(),
        download_dir,
    ));

    let app = api::router()
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
    tracing::info!("chanvault starting on http://{}", addr);
    tracing::info!("");
    tracing::info!("API Endpoints:");
    tracing::info!("  POST   /api/files?channel=<id>       - Upload a file");
    tracing::info!("  GET    /api/files/:id                - Download a file");
    tracing::info!("  GET    /share/:share_id              - Public share link");
    tracing::info!("  POST   /api/batch/upload?channel=<id> - Batch upload");
    tracing::info!("  POST   /api/batch/download           - Batch download to disk");
    tracing::info!("  GET    /api/batch/:id                - Batch progress");
    tracing::info!("  PUT    /api/config                   - Transfer settings");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
